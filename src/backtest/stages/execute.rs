use crate::artifacts::{ArtifactKeys, CONTENT_TYPE_TEXT};
use crate::backtest::model::{StageError, StageOutcome};
use crate::backtest::pipeline::BacktestPipeline;
use crate::backtest::queue::{Stage, StageJob};
use crate::backtest::status::BacktestStatus;
use crate::sandbox::{RunProfile, ScriptFailure};
use crate::storage::entity::backtest_request;
use crate::storage::repository::{ArtifactUrls, StatusUpdate};
use log::info;

/// Full-dataset run. Failures here are terminal; there is no repair at this stage.
pub(crate) async fn run(
    p: &BacktestPipeline,
    req: &backtest_request::Model,
    lease: &str,
) -> Result<StageOutcome, StageError> {
    let id = req.id.as_str();

    let ws = p.sandbox.workspace()?;
    p.artifacts
        .download(&ArtifactKeys::script(id), &ws.script)
        .await?;
    p.artifacts
        .download(&ArtifactKeys::full_data(id), &ws.data)
        .await?;

    let out = p.sandbox.run(&ws, RunProfile::Execution).await?;

    // the log is kept whatever the outcome; stdout stands in when the script wrote none
    let log = match out.log {
        Some(ref bytes) if !bytes.is_empty() => Some(bytes.clone()),
        _ if !out.stdout.trim().is_empty() => Some(out.stdout.clone().into_bytes()),
        _ => None,
    };
    if let Some(bytes) = log {
        let url = p
            .store(&ArtifactKeys::log(id), &bytes, CONTENT_TYPE_TEXT)
            .await?;
        p.set_urls(
            id,
            ArtifactUrls {
                log_url: Some(url),
                ..Default::default()
            },
        )
        .await?;
    }

    if let Err(failure) = out.check() {
        return Err(StageError::script(execution_failed_message(&failure)));
    }

    info!("{}: execution finished in {:.1}s", id, out.duration.as_secs_f64());
    p.advance(
        id,
        lease,
        BacktestStatus::Executing,
        BacktestStatus::GeneratingReport,
        StatusUpdate {
            ready_for_report: Some(true),
            release_lease: true,
            ..Default::default()
        },
    )
    .await?;
    p.enqueue(StageJob::new(id, Stage::Report, 1)).await?;
    Ok(StageOutcome::Advanced(BacktestStatus::GeneratingReport))
}

fn execution_failed_message(failure: &ScriptFailure) -> String {
    if failure.timed_out {
        let secs = failure.timeout.map(|d| d.as_secs()).unwrap_or_default();
        format!("Execution timed out after {secs}s")
    } else {
        format!("Execution failed: {failure}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn messages_distinguish_timeout() {
        let timeout = ScriptFailure {
            exit_code: None,
            stderr: String::new(),
            timed_out: true,
            timeout: Some(Duration::from_secs(1800)),
        };
        assert_eq!(
            execution_failed_message(&timeout),
            "Execution timed out after 1800s"
        );

        let crash = ScriptFailure {
            exit_code: Some(1),
            stderr: "ZeroDivisionError".into(),
            timed_out: false,
            timeout: None,
        };
        assert_eq!(
            execution_failed_message(&crash),
            "Execution failed: ZeroDivisionError"
        );
    }
}
