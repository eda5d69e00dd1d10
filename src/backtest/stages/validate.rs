use crate::artifacts::{ArtifactKeys, CONTENT_TYPE_PYTHON};
use crate::backtest::model::{StageError, StageOutcome};
use crate::backtest::pipeline::BacktestPipeline;
use crate::backtest::queue::{Stage, StageJob};
use crate::backtest::stages::validation_failed_message;
use crate::backtest::status::BacktestStatus;
use crate::sandbox::RunProfile;
use crate::storage::entity::backtest_request;
use crate::storage::repository::{ArtifactUrls, BacktestRequestRepository, StatusUpdate};
use log::{debug, info, warn};

/// Runs the script on the sample dataset. A failure either queues a repaired script for the
/// next attempt or, once attempts run out, ends the request at validation_failed.
pub(crate) async fn run(
    p: &BacktestPipeline,
    req: &backtest_request::Model,
    lease: &str,
    job: &StageJob,
) -> Result<StageOutcome, StageError> {
    let id = req.id.as_str();
    p.advance(
        id,
        lease,
        BacktestStatus::ReadyForValidation,
        BacktestStatus::Validating,
        StatusUpdate::default(),
    )
    .await?;

    // the persisted counter wins over the job argument, so restarts cannot reset the bound
    let attempt = req.validation_attempts.max(0) as u32 + 1;
    if attempt != job.attempt {
        debug!(
            "{}: job says attempt {}, request row says {}",
            id, job.attempt, attempt
        );
    }

    let ws = p.sandbox.workspace()?;
    // the script may rewrite its own file, so the repair works from this copy
    let script = p.artifacts.get_content(&ArtifactKeys::script(id)).await?;
    tokio::fs::write(&ws.script, &script)
        .await
        .map_err(|e| StageError::infrastructure(format!("writing script to workspace: {e}")))?;
    p.artifacts
        .download(&ArtifactKeys::validation_data(id), &ws.data)
        .await?;

    let out = p.sandbox.run(&ws, RunProfile::Validation).await?;
    let failure = match out.check() {
        Ok(()) => {
            info!("{}: validation attempt {} passed", id, attempt);
            p.advance(
                id,
                lease,
                BacktestStatus::Validating,
                BacktestStatus::Executing,
                StatusUpdate::release(),
            )
            .await?;
            p.enqueue(StageJob::new(id, Stage::Execute, 1)).await?;
            return Ok(StageOutcome::Advanced(BacktestStatus::Executing));
        }
        Err(f) => f,
    };

    let error = failure.to_string();
    warn!("{}: validation attempt {} failed: {}", id, attempt, error);
    BacktestRequestRepository::record_validation_attempt(&p.db, id, lease, attempt, &error)
        .await?;

    if attempt >= p.cfg.max_retry_attempts {
        return Err(StageError::script(validation_failed_message(attempt, &error)));
    }

    info!("{}: requesting repair after attempt {}", id, attempt);
    let repaired = match p.synth.repair_script(&script, &error).await {
        Ok(Some(repaired)) => repaired,
        Ok(None) => {
            return Err(StageError::script(validation_failed_message(attempt, &error)));
        }
        Err(e) => {
            warn!("{}: repair after attempt {} failed: {}", id, attempt, e);
            return Err(StageError::script(validation_failed_message(attempt, &error)));
        }
    };

    p.advance(
        id,
        lease,
        BacktestStatus::Validating,
        BacktestStatus::GeneratingScript,
        StatusUpdate::default(),
    )
    .await?;
    let url = p
        .store(
            &ArtifactKeys::script(id),
            repaired.as_bytes(),
            CONTENT_TYPE_PYTHON,
        )
        .await?;
    p.set_urls(
        id,
        ArtifactUrls {
            script_url: Some(url),
            ..Default::default()
        },
    )
    .await?;
    p.advance(
        id,
        lease,
        BacktestStatus::GeneratingScript,
        BacktestStatus::ReadyForValidation,
        StatusUpdate::release(),
    )
    .await?;

    let next = attempt + 1;
    p.enqueue(StageJob::new(id, Stage::Validate, next)).await?;
    Ok(StageOutcome::Retrying { attempt: next })
}
