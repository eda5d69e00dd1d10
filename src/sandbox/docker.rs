use crate::sandbox::{RawOutput, SandboxConfig, SandboxError, Workspace, DATA_FILE, LOG_FILE, SCRIPT_FILE};
use log::warn;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const WORKDIR: &str = "/work";

pub(crate) fn docker_run_args(cfg: &SandboxConfig, ws: &Workspace, name: &str) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--network=none".to_string(),
        "--read-only".to_string(),
        "--cap-drop".to_string(),
        "ALL".to_string(),
        "--security-opt".to_string(),
        "no-new-privileges".to_string(),
        "--pids-limit=256".to_string(),
        format!("--memory={}m", cfg.memory_mb),
        format!("--cpus={}", cfg.cpus),
        "--tmpfs".to_string(),
        "/tmp:rw,size=64m".to_string(),
        "-e".to_string(),
        "PYTHONUNBUFFERED=1".to_string(),
        "-v".to_string(),
        format!("{}:{}", ws.path().display(), WORKDIR),
        "-w".to_string(),
        WORKDIR.to_string(),
        cfg.docker_image.clone(),
        "python".to_string(),
        SCRIPT_FILE.to_string(),
        "--data".to_string(),
        DATA_FILE.to_string(),
        "--log".to_string(),
        LOG_FILE.to_string(),
    ]
}

pub(crate) async fn run(
    cfg: &SandboxConfig,
    ws: &Workspace,
    timeout: Duration,
) -> Result<RawOutput, SandboxError> {
    let name = format!("sandbox-{}", uuid::Uuid::new_v4().simple());
    let child = Command::new("docker")
        .args(docker_run_args(cfg, ws, &name))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SandboxError::Spawn {
            program: "docker".to_string(),
            source,
        })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(RawOutput {
                exit_code: output.status.code(),
                stdout: output.stdout,
                stderr: output.stderr,
                timed_out: false,
            })
        }
        Err(_) => {
            // killing the docker client does not stop the container
            let removed = Command::new("docker")
                .args(["rm", "-f", &name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if !matches!(removed, Ok(s) if s.success()) {
                warn!("failed to remove timed-out container {}", name);
            }
            Ok(RawOutput {
                exit_code: None,
                stdout: Vec::new(),
                stderr: Vec::new(),
                timed_out: true,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{SandboxBackend, SandboxRunner};

    #[test]
    fn run_args_enforce_policy() {
        let cfg = SandboxConfig {
            backend: SandboxBackend::Docker,
            memory_mb: 512,
            cpus: 0.5,
            ..Default::default()
        };
        let runner = SandboxRunner::new(cfg.clone());
        let ws = runner.workspace().unwrap();
        let args = docker_run_args(&cfg, &ws, "sandbox-x");

        for flag in ["--rm", "--network=none", "--read-only", "--memory=512m", "--cpus=0.5"] {
            assert!(args.iter().any(|a| a == flag), "missing {flag}");
        }
        let cap = args.iter().position(|a| a == "--cap-drop").unwrap();
        assert_eq!(args[cap + 1], "ALL");
        assert!(args.ends_with(&[
            "python".to_string(),
            "script.py".to_string(),
            "--data".to_string(),
            "data.csv".to_string(),
            "--log".to_string(),
            "backtest.log".to_string(),
        ]));
    }
}
