pub mod backtest_request_repo;
pub mod job_repo;

pub use backtest_request_repo::{
    attempt_history, ArtifactUrls, AttemptRecord, BacktestRequestRepository, NewBacktestRequest,
    StatusUpdate,
};
pub use job_repo::{JobRepository, JobStats};

use crate::backtest::status::BacktestStatus;
use sea_orm::DbErr;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),
    #[error("backtest request {0} not found")]
    NotFound(String),
    #[error("request {id} is no longer at {expected} or its lease was lost")]
    StaleState { id: String, expected: BacktestStatus },
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: BacktestStatus,
        to: BacktestStatus,
    },
    #[error("transition to {0} requires an error message")]
    MissingErrorMessage(BacktestStatus),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
