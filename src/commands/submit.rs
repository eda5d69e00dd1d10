use crate::backtest::{Stage, StageJob, TaskQueue};
use crate::notify::Notifier;
use crate::storage::entity::backtest_request;
use crate::storage::repository::{BacktestRequestRepository, NewBacktestRequest};
use crate::synth::StrategySynthesizer;
use chrono::NaiveDate;
use log::info;
use sea_orm::DatabaseConnection;

pub const MAX_SYMBOL_CHARS: usize = 20;
pub const MIN_DESCRIPTION_CHARS: usize = 10;

#[derive(Clone, Debug)]
pub struct SubmitRequest {
    pub owner_id: String,
    pub instrument_symbol: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub strategy_description: String,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum IntakeError {
    #[error("owner id is required")]
    MissingOwner,
    #[error("instrument symbol must be 1-{MAX_SYMBOL_CHARS} characters")]
    InvalidSymbol,
    #[error("strategy description must be at least {MIN_DESCRIPTION_CHARS} characters")]
    DescriptionTooShort,
    #[error("from date {from} is after to date {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },
}

impl SubmitRequest {
    /// Trims the text fields and checks the intake rules.
    pub fn validated(self) -> Result<Self, IntakeError> {
        let owner_id = self.owner_id.trim().to_string();
        let instrument_symbol = self.instrument_symbol.trim().to_string();
        let strategy_description = self.strategy_description.trim().to_string();

        if owner_id.is_empty() {
            return Err(IntakeError::MissingOwner);
        }
        let symbol_len = instrument_symbol.chars().count();
        if symbol_len == 0 || symbol_len > MAX_SYMBOL_CHARS {
            return Err(IntakeError::InvalidSymbol);
        }
        if strategy_description.chars().count() < MIN_DESCRIPTION_CHARS {
            return Err(IntakeError::DescriptionTooShort);
        }
        if self.from_date > self.to_date {
            return Err(IntakeError::InvalidRange {
                from: self.from_date,
                to: self.to_date,
            });
        }
        Ok(Self {
            owner_id,
            instrument_symbol,
            strategy_description,
            ..self
        })
    }
}

/// Creates the request at `pending` with a generated title and queues script generation.
pub async fn run(
    req: SubmitRequest,
    db: &DatabaseConnection,
    synth: &dyn StrategySynthesizer,
    queue: &dyn TaskQueue,
    notifier: &Notifier,
) -> anyhow::Result<backtest_request::Model> {
    let req = req.validated()?;
    let title = synth.strategy_title(&req.strategy_description).await;

    let created = BacktestRequestRepository::create(
        db,
        NewBacktestRequest {
            owner_id: req.owner_id,
            instrument_symbol: req.instrument_symbol,
            from_date: req.from_date,
            to_date: req.to_date,
            strategy_description: req.strategy_description,
            strategy_title: title,
        },
    )
    .await?;
    queue
        .enqueue(StageJob::new(&created.id, Stage::GenerateScript, 1))
        .await?;
    notifier.publish(&created).await;

    info!(
        "submitted {} for {} ({} {}..{})",
        created.id, created.owner_id, created.instrument_symbol, created.from_date, created.to_date
    );
    Ok(created)
}
