use crate::ai::LlmError;
use crate::artifacts::ArtifactError;
use crate::backtest::queue::QueueError;
use crate::backtest::status::BacktestStatus;
use crate::market::MarketDataError;
use crate::sandbox::SandboxError;
use crate::storage::entity::backtest_request;
use crate::storage::repository::RepoError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureKind {
    /// The LLM returned no usable script, repair or report.
    Synthesis,
    /// Generated code exited non-zero or timed out.
    Script,
    /// Artifact store, database, queue or market data errors.
    Infrastructure,
    /// Another delivery owns the request now; nothing to record.
    Superseded,
}

#[derive(Debug, Clone)]
pub struct StageError {
    pub kind: FailureKind,
    pub message: String,
}

impl StageError {
    pub fn synthesis(msg: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Synthesis,
            message: msg.into(),
        }
    }

    pub fn script(msg: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Script,
            message: msg.into(),
        }
    }

    pub fn infrastructure(msg: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Infrastructure,
            message: msg.into(),
        }
    }

    pub fn superseded(msg: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Superseded,
            message: msg.into(),
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for StageError {}

impl From<RepoError> for StageError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::StaleState { .. } => Self::superseded(e.to_string()),
            other => Self::infrastructure(other.to_string()),
        }
    }
}

impl From<ArtifactError> for StageError {
    fn from(e: ArtifactError) -> Self {
        Self::infrastructure(e.to_string())
    }
}

impl From<SandboxError> for StageError {
    fn from(e: SandboxError) -> Self {
        Self::infrastructure(e.to_string())
    }
}

impl From<MarketDataError> for StageError {
    fn from(e: MarketDataError) -> Self {
        Self::infrastructure(e.to_string())
    }
}

impl From<QueueError> for StageError {
    fn from(e: QueueError) -> Self {
        Self::infrastructure(e.to_string())
    }
}

impl From<LlmError> for StageError {
    fn from(e: LlmError) -> Self {
        Self::synthesis(e.to_string())
    }
}

/// What one stage delivery did to its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Advanced(BacktestStatus),
    /// Validation failed and a repaired script was queued for this attempt.
    Retrying { attempt: u32 },
    Failed(BacktestStatus),
    /// Stale or duplicate delivery; the request was not touched.
    Skipped,
}

/// Client-visible projection of a request. Lease and version internals stay private.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicBacktest {
    pub id: String,
    pub user_id: String,
    pub instrument_symbol: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub strategy_title: Option<String>,
    pub strategy_description: String,
    pub status: BacktestStatus,
    pub error_message: Option<String>,
    pub ready_for_report: bool,
    pub generated_report: bool,
    pub script_url: Option<String>,
    pub validation_data_url: Option<String>,
    pub full_data_url: Option<String>,
    pub log_url: Option<String>,
    pub report_url: Option<String>,
    pub preview_image_url: Option<String>,
    pub share_id: Option<String>,
    pub is_public: bool,
    pub validation_attempts: i32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&backtest_request::Model> for PublicBacktest {
    fn from(m: &backtest_request::Model) -> Self {
        Self {
            id: m.id.clone(),
            user_id: m.owner_id.clone(),
            instrument_symbol: m.instrument_symbol.clone(),
            from_date: m.from_date,
            to_date: m.to_date,
            strategy_title: m.strategy_title.clone(),
            strategy_description: m.strategy_description.clone(),
            status: m.status,
            error_message: m.error_message.clone(),
            ready_for_report: m.ready_for_report,
            generated_report: m.generated_report,
            script_url: m.script_url.clone(),
            validation_data_url: m.validation_data_url.clone(),
            full_data_url: m.full_data_url.clone(),
            log_url: m.log_url.clone(),
            report_url: m.report_url.clone(),
            preview_image_url: m.preview_image_url.clone(),
            share_id: m.share_id.clone(),
            is_public: m.is_public,
            validation_attempts: m.validation_attempts,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}
