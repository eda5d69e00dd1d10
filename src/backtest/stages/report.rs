use crate::artifacts::{ArtifactKeys, CONTENT_TYPE_MARKDOWN};
use crate::backtest::model::{StageError, StageOutcome};
use crate::backtest::pipeline::BacktestPipeline;
use crate::backtest::status::BacktestStatus;
use crate::storage::entity::backtest_request;
use crate::storage::repository::{ArtifactUrls, StatusUpdate};

pub(crate) async fn run(
    p: &BacktestPipeline,
    req: &backtest_request::Model,
    lease: &str,
) -> Result<StageOutcome, StageError> {
    let id = req.id.as_str();

    let log_text = p.artifacts.get_content(&ArtifactKeys::log(id)).await?;
    if log_text.trim().is_empty() {
        return Err(StageError::synthesis("Backtest log is empty; nothing to report on"));
    }

    let report = p.synth.synthesize_report(&log_text).await?;
    let url = p
        .store(
            &ArtifactKeys::report(id),
            report.as_bytes(),
            CONTENT_TYPE_MARKDOWN,
        )
        .await?;
    p.set_urls(
        id,
        ArtifactUrls {
            report_url: Some(url),
            ..Default::default()
        },
    )
    .await?;

    p.advance(
        id,
        lease,
        BacktestStatus::GeneratingReport,
        BacktestStatus::Completed,
        StatusUpdate {
            generated_report: Some(true),
            release_lease: true,
            ..Default::default()
        },
    )
    .await?;
    Ok(StageOutcome::Advanced(BacktestStatus::Completed))
}
