pub mod docker;
pub mod process;

use log::{info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const SCRIPT_FILE: &str = "script.py";
pub const DATA_FILE: &str = "data.csv";
pub const LOG_FILE: &str = "backtest.log";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SandboxBackend {
    /// Bare child process in a scratch directory with a cleared environment.
    Process,
    /// `docker run` with no network, read-only rootfs and memory/cpu limits.
    Docker,
}

impl std::str::FromStr for SandboxBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(Self::Process),
            "docker" => Ok(Self::Docker),
            other => Err(format!("unknown sandbox backend '{other}'")),
        }
    }
}

/// Execution policy for generated scripts.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub backend: SandboxBackend,
    pub interpreter: String,
    pub validation_timeout: Duration,
    pub execution_timeout: Duration,
    pub max_output_bytes: usize,
    pub docker_image: String,
    pub memory_mb: u64,
    pub cpus: f64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Process,
            interpreter: "python3".to_string(),
            validation_timeout: Duration::from_secs(300),
            execution_timeout: Duration::from_secs(1800),
            max_output_bytes: 64 * 1024,
            docker_image: "python:3.11-slim".to_string(),
            memory_mb: 2048,
            cpus: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunProfile {
    Validation,
    Execution,
}

impl RunProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Execution => "execution",
        }
    }
}

/// Scratch directory for one invocation. Removed on drop.
pub struct Workspace {
    dir: TempDir,
    pub script: PathBuf,
    pub data: PathBuf,
    pub log: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Clone, Debug)]
pub struct RunOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
    /// Contents of the log file the script wrote, if any.
    pub log: Option<Vec<u8>>,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn check(&self) -> Result<(), ScriptFailure> {
        if self.success() {
            return Ok(());
        }
        Err(ScriptFailure {
            exit_code: self.exit_code,
            stderr: self.stderr.clone(),
            timed_out: self.timed_out,
            timeout: self.timed_out.then_some(self.duration),
        })
    }
}

/// A generated script that exited non-zero or ran past its timeout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptFailure {
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub timed_out: bool,
    pub timeout: Option<Duration>,
}

impl fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timed_out {
            let secs = self.timeout.map(|d| d.as_secs()).unwrap_or_default();
            return write!(f, "Script timed out after {secs}s");
        }
        let stderr = self.stderr.trim();
        match (stderr.is_empty(), self.exit_code) {
            (false, _) => f.write_str(stderr),
            (true, Some(code)) => write!(f, "Script exited with status {code}"),
            (true, None) => f.write_str("Script was terminated by a signal"),
        }
    }
}

impl std::error::Error for ScriptFailure {}

#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    #[error("sandbox workspace error: {0}")]
    Workspace(#[source] std::io::Error),
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sandbox io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SandboxRunner {
    cfg: SandboxConfig,
}

impl SandboxRunner {
    pub fn new(cfg: SandboxConfig) -> Self {
        Self { cfg }
    }

    pub fn timeout_for(&self, profile: RunProfile) -> Duration {
        match profile {
            RunProfile::Validation => self.cfg.validation_timeout,
            RunProfile::Execution => self.cfg.execution_timeout,
        }
    }

    pub fn workspace(&self) -> Result<Workspace, SandboxError> {
        let dir = tempfile::Builder::new()
            .prefix("sandbox-")
            .tempdir()
            .map_err(SandboxError::Workspace)?;
        let root = dir.path().to_path_buf();
        Ok(Workspace {
            script: root.join(SCRIPT_FILE),
            data: root.join(DATA_FILE),
            log: root.join(LOG_FILE),
            dir,
        })
    }

    /// Runs `script --data <data> --log <log>` under the profile's timeout.
    pub async fn run(&self, ws: &Workspace, profile: RunProfile) -> Result<RunOutput, SandboxError> {
        let timeout = self.timeout_for(profile);
        let started = Instant::now();
        let raw = match self.cfg.backend {
            SandboxBackend::Process => process::run(&self.cfg, ws, timeout).await?,
            SandboxBackend::Docker => docker::run(&self.cfg, ws, timeout).await?,
        };

        let log = match tokio::fs::read(&ws.log).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(SandboxError::Io(e)),
        };

        let out = RunOutput {
            exit_code: raw.exit_code,
            stdout: tail_utf8(&raw.stdout, self.cfg.max_output_bytes),
            stderr: tail_utf8(&raw.stderr, self.cfg.max_output_bytes),
            timed_out: raw.timed_out,
            duration: if raw.timed_out { timeout } else { started.elapsed() },
            log,
        };

        if out.success() {
            info!(
                "sandbox {} run ok in {:.1}s",
                profile.as_str(),
                out.duration.as_secs_f64()
            );
        } else {
            warn!(
                "sandbox {} run failed (exit {:?}, timed out: {}) after {:.1}s",
                profile.as_str(),
                out.exit_code,
                out.timed_out,
                out.duration.as_secs_f64()
            );
        }
        Ok(out)
    }
}

/// What a backend hands back before log collection and truncation.
pub(crate) struct RawOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

/// Keeps the last `max` bytes; tracebacks put the useful line at the end.
fn tail_utf8(bytes: &[u8], max: usize) -> String {
    let start = bytes.len().saturating_sub(max);
    let s = String::from_utf8_lossy(&bytes[start..]);
    if start > 0 {
        format!("[...truncated...]\n{}", s.trim_start_matches('\u{FFFD}'))
    } else {
        s.into_owned()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner(timeout: Duration) -> SandboxRunner {
        SandboxRunner::new(SandboxConfig {
            interpreter: "sh".into(),
            validation_timeout: timeout,
            execution_timeout: timeout,
            max_output_bytes: 256,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn passes_data_and_log_arguments() {
        let r = runner(Duration::from_secs(10));
        let ws = r.workspace().unwrap();
        std::fs::write(&ws.data, "time,close\n1,2\n").unwrap();
        std::fs::write(
            &ws.script,
            "[ \"$1\" = --data ] || exit 3\n[ \"$3\" = --log ] || exit 4\nwc -l < \"$2\" > \"$4\"\necho done\n",
        )
        .unwrap();

        let out = r.run(&ws, RunProfile::Validation).await.unwrap();
        assert!(out.check().is_ok(), "{:?}", out);
        assert_eq!(out.stdout.trim(), "done");
        let log = String::from_utf8(out.log.unwrap()).unwrap();
        assert_eq!(log.trim(), "2");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let r = runner(Duration::from_secs(10));
        let ws = r.workspace().unwrap();
        std::fs::write(&ws.data, "").unwrap();
        std::fs::write(&ws.script, "echo \"KeyError: 'volume'\" >&2\nexit 1\n").unwrap();

        let out = r.run(&ws, RunProfile::Validation).await.unwrap();
        let failure = out.check().unwrap_err();
        assert_eq!(failure.exit_code, Some(1));
        assert!(!failure.timed_out);
        assert_eq!(failure.to_string(), "KeyError: 'volume'");
        assert!(out.log.is_none());
    }

    #[tokio::test]
    async fn timeout_is_a_script_failure() {
        let r = runner(Duration::from_millis(300));
        let ws = r.workspace().unwrap();
        std::fs::write(&ws.data, "").unwrap();
        std::fs::write(&ws.script, "echo started > \"$4\"\nsleep 5\n").unwrap();

        let out = r.run(&ws, RunProfile::Execution).await.unwrap();
        assert!(out.timed_out);
        let failure = out.check().unwrap_err();
        assert!(failure.timed_out);
        assert!(failure.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn environment_is_cleared() {
        std::env::set_var("ALPHABENCH_SECRET_FOR_TEST", "leak");
        let r = runner(Duration::from_secs(10));
        let ws = r.workspace().unwrap();
        std::fs::write(&ws.data, "").unwrap();
        std::fs::write(&ws.script, "echo \"[$ALPHABENCH_SECRET_FOR_TEST]\"\n").unwrap();

        let out = r.run(&ws, RunProfile::Validation).await.unwrap();
        assert_eq!(out.stdout.trim(), "[]");
    }

    #[test]
    fn output_keeps_the_tail() {
        let s = tail_utf8(b"0123456789", 4);
        assert!(s.ends_with("6789"));
        assert!(s.starts_with("[...truncated...]"));
        assert_eq!(tail_utf8(b"abc", 4), "abc");
    }

    #[test]
    fn backend_parses() {
        assert_eq!("Docker".parse::<SandboxBackend>().unwrap(), SandboxBackend::Docker);
        assert!("vm".parse::<SandboxBackend>().is_err());
    }
}
