use crate::artifacts::{ArtifactKeys, CONTENT_TYPE_CSV, CONTENT_TYPE_PYTHON};
use crate::backtest::model::{StageError, StageOutcome};
use crate::backtest::pipeline::BacktestPipeline;
use crate::backtest::queue::{Stage, StageJob};
use crate::backtest::stages::NO_SCRIPT_MESSAGE;
use crate::backtest::status::BacktestStatus;
use crate::storage::entity::backtest_request;
use crate::storage::repository::{ArtifactUrls, StatusUpdate};
use crate::synth::columns_hint;
use log::info;

/// pending -> generating_script -> ready_for_validation, producing the script and both datasets.
pub(crate) async fn run(
    p: &BacktestPipeline,
    req: &backtest_request::Model,
    lease: &str,
) -> Result<StageOutcome, StageError> {
    let id = req.id.as_str();
    p.advance(
        id,
        lease,
        BacktestStatus::Pending,
        BacktestStatus::GeneratingScript,
        StatusUpdate::default(),
    )
    .await?;

    let available = p
        .market
        .available_columns(&req.instrument_symbol, req.from_date, req.to_date)
        .await?;
    let hint = columns_hint(&req.instrument_symbol, &available);

    let generated = p
        .synth
        .synthesize_script(&req.strategy_description, &hint)
        .await?
        .ok_or_else(|| StageError::synthesis(NO_SCRIPT_MESSAGE))?;

    let missing: Vec<&str> = generated
        .data_columns
        .iter()
        .filter(|c| !available.contains(c))
        .map(|c| c.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(StageError::synthesis(format!(
            "Strategy needs data columns not available for {}: {}",
            req.instrument_symbol,
            missing.join(", ")
        )));
    }

    let dataset = p
        .market
        .fetch(
            &req.instrument_symbol,
            req.from_date,
            req.to_date,
            &generated.data_columns,
        )
        .await?;
    if dataset.is_empty() {
        return Err(StageError::infrastructure(format!(
            "No market data for {} between {} and {}",
            req.instrument_symbol, req.from_date, req.to_date
        )));
    }
    info!(
        "{}: script {} bytes, dataset {} rows x {} columns",
        id,
        generated.script.len(),
        dataset.len(),
        dataset.columns.len()
    );

    let sample_csv = dataset.head(p.cfg.validation_sample_rows).to_csv()?;
    let full_csv = dataset.to_csv()?;
    let urls = ArtifactUrls {
        script_url: Some(
            p.store(
                &ArtifactKeys::script(id),
                generated.script.as_bytes(),
                CONTENT_TYPE_PYTHON,
            )
            .await?,
        ),
        validation_data_url: Some(
            p.store(
                &ArtifactKeys::validation_data(id),
                sample_csv.as_bytes(),
                CONTENT_TYPE_CSV,
            )
            .await?,
        ),
        full_data_url: Some(
            p.store(
                &ArtifactKeys::full_data(id),
                full_csv.as_bytes(),
                CONTENT_TYPE_CSV,
            )
            .await?,
        ),
        ..Default::default()
    };
    p.set_urls(id, urls).await?;

    p.advance(
        id,
        lease,
        BacktestStatus::GeneratingScript,
        BacktestStatus::ReadyForValidation,
        StatusUpdate::release(),
    )
    .await?;
    p.enqueue(StageJob::new(id, Stage::Validate, 1)).await?;
    Ok(StageOutcome::Advanced(BacktestStatus::ReadyForValidation))
}
