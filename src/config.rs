use crate::ai::LlmClientConfig;
use crate::backtest::{PipelineConfig, SupervisorConfig};
use crate::sandbox::SandboxConfig;
use std::str::FromStr;
use std::time::Duration;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Process-wide settings, read once from the environment (after `.env` is loaded).
#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub artifact_dir: String,
    pub artifact_public_url: Option<String>,
    pub ws_bind: String,
    pub worker_count: usize,
    pub job_poll: Duration,
    pub pipeline: PipelineConfig,
    pub sandbox: SandboxConfig,
    pub supervisor: SupervisorConfig,
    pub llm: LlmClientConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`Settings::from_env`] with an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = SandboxConfig::default();

        let sandbox = SandboxConfig {
            backend: parse_or(&get, "SANDBOX_BACKEND", defaults.backend)?,
            interpreter: get("SANDBOX_INTERPRETER").unwrap_or(defaults.interpreter),
            validation_timeout: secs_or(&get, "SANDBOX_VALIDATION_TIMEOUT_SECS", 300)?,
            execution_timeout: secs_or(&get, "SANDBOX_EXECUTION_TIMEOUT_SECS", 1800)?,
            max_output_bytes: parse_or(&get, "SANDBOX_MAX_OUTPUT_BYTES", defaults.max_output_bytes)?,
            docker_image: get("SANDBOX_DOCKER_IMAGE").unwrap_or(defaults.docker_image),
            memory_mb: parse_or(&get, "SANDBOX_MEMORY_MB", defaults.memory_mb)?,
            cpus: parse_or(&get, "SANDBOX_CPUS", defaults.cpus)?,
        };

        let pipeline = PipelineConfig {
            max_retry_attempts: parse_or(&get, "MAX_RETRY_ATTEMPTS", 3u32)?.max(1),
            validation_sample_rows: parse_or(&get, "VALIDATION_SAMPLE_ROWS", 100usize)?.max(1),
            url_ttl: secs_or(&get, "ARTIFACT_URL_TTL_SECS", 3600)?,
        };

        let supervisor = SupervisorConfig {
            stage_budget: secs_or(&get, "STAGE_BUDGET_SECS", 2400)?,
            requeue_after: secs_or(&get, "REQUEUE_AFTER_SECS", 600)?,
            interval: secs_or(&get, "SUPERVISOR_INTERVAL_SECS", 60)?,
        };

        let llm_defaults = LlmClientConfig::default();
        let llm = LlmClientConfig {
            backend: parse_or(&get, "LLM_PROVIDER", llm_defaults.backend)?,
            timeout: secs_or(&get, "LLM_TIMEOUT_SECS", llm_defaults.timeout.as_secs())?,
            proxy: get("LLM_PROXY"),
        };

        Ok(Self {
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://alphabench.db?mode=rwc".to_string()),
            artifact_dir: get("ARTIFACT_DIR").unwrap_or_else(|| "artifacts".to_string()),
            artifact_public_url: get("ARTIFACT_PUBLIC_URL"),
            ws_bind: get("WS_BIND").unwrap_or_else(|| "127.0.0.1:8765".to_string()),
            worker_count: parse_or(&get, "WORKER_COUNT", 4usize)?.max(1),
            job_poll: Duration::from_millis(parse_or(&get, "JOB_POLL_MS", 300u64)?),
            pipeline,
            sandbox,
            supervisor,
            llm,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn secs_or<G>(get: &G, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::LlmBackend;
    use crate::sandbox::SandboxBackend;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.database_url, "sqlite://alphabench.db?mode=rwc");
        assert_eq!(s.worker_count, 4);
        assert_eq!(s.pipeline.max_retry_attempts, 3);
        assert_eq!(s.pipeline.validation_sample_rows, 100);
        assert_eq!(s.sandbox.backend, SandboxBackend::Process);
        assert_eq!(s.sandbox.execution_timeout, Duration::from_secs(1800));
        assert_eq!(s.supervisor.stage_budget, Duration::from_secs(2400));
        assert!(s.artifact_public_url.is_none());
        assert_eq!(s.llm.backend, LlmBackend::OpenAi);
        assert_eq!(s.llm.timeout, Duration::from_secs(30));
        assert!(s.llm.proxy.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let s = settings(&[
            ("SANDBOX_BACKEND", "docker"),
            ("SANDBOX_CPUS", "0.5"),
            ("MAX_RETRY_ATTEMPTS", "5"),
            ("JOB_POLL_MS", "50"),
            ("ARTIFACT_PUBLIC_URL", "https://cdn.example.com/"),
            ("LLM_PROVIDER", "Local"),
            ("LLM_TIMEOUT_SECS", "90"),
            ("LLM_PROXY", "127.0.0.1:1080"),
        ])
        .unwrap();
        assert_eq!(s.sandbox.backend, SandboxBackend::Docker);
        assert_eq!(s.sandbox.cpus, 0.5);
        assert_eq!(s.pipeline.max_retry_attempts, 5);
        assert_eq!(s.job_poll, Duration::from_millis(50));
        assert_eq!(s.artifact_public_url.as_deref(), Some("https://cdn.example.com/"));
        assert_eq!(s.llm.backend, LlmBackend::Local);
        assert_eq!(s.llm.timeout, Duration::from_secs(90));
        assert_eq!(s.llm.proxy.as_deref(), Some("127.0.0.1:1080"));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let s = settings(&[("WORKER_COUNT", "  ")]).unwrap();
        assert_eq!(s.worker_count, 4);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = settings(&[("WORKER_COUNT", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "WORKER_COUNT", .. }));

        let err = settings(&[("SANDBOX_BACKEND", "vm")]).unwrap_err();
        assert!(err.to_string().contains("SANDBOX_BACKEND"));
    }

    #[test]
    fn malformed_llm_settings_are_rejected() {
        let err = settings(&[("LLM_PROVIDER", "anthropic")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LLM_PROVIDER", .. }));

        let err = settings(&[("LLM_TIMEOUT_SECS", "30s")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LLM_TIMEOUT_SECS", .. }));
    }
}
