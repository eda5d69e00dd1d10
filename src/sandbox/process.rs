use crate::sandbox::{RawOutput, SandboxConfig, SandboxError, Workspace};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs the script as a direct child. Only the scratch directory is writable by contract;
/// nothing else is isolated, so prefer the docker backend for untrusted code.
pub(crate) async fn run(
    cfg: &SandboxConfig,
    ws: &Workspace,
    timeout: Duration,
) -> Result<RawOutput, SandboxError> {
    let path = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());

    let child = Command::new(&cfg.interpreter)
        .arg(&ws.script)
        .arg("--data")
        .arg(&ws.data)
        .arg("--log")
        .arg(&ws.log)
        .current_dir(ws.path())
        .env_clear()
        .env("PATH", path)
        .env("HOME", ws.path())
        .env("TMPDIR", ws.path())
        .env("PYTHONUNBUFFERED", "1")
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SandboxError::Spawn {
            program: cfg.interpreter.clone(),
            source,
        })?;

    // dropping the wait future on timeout drops the child, which kills it
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
        Err(_) => Ok(RawOutput {
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            timed_out: true,
        }),
    }
}
