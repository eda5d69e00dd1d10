use crate::backtest::{BacktestStatus, Stage, StageJob, TaskQueue};
use crate::storage::repository::BacktestRequestRepository;
use log::info;
use sea_orm::DatabaseConnection;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RetriggerError {
    #[error("backtest {id} already finished with status {status}")]
    Terminal { id: String, status: BacktestStatus },
    #[error("backtest {id} is being worked on ({status})")]
    Leased { id: String, status: BacktestStatus },
    #[error("backtest {id} is mid-stage ({status}) with no worker; wait for the supervisor")]
    NoEntryStage { id: String, status: BacktestStatus },
}

/// Queues the entry job for the request's current status. Duplicate deliveries are harmless:
/// the stage claim only lets one through.
pub async fn run(
    id: &str,
    db: &DatabaseConnection,
    queue: &dyn TaskQueue,
) -> anyhow::Result<StageJob> {
    let m = BacktestRequestRepository::get_by_id(db, id).await?;
    if m.status.is_terminal() {
        return Err(RetriggerError::Terminal {
            id: m.id,
            status: m.status,
        }
        .into());
    }
    if m.lease_token.is_some() {
        return Err(RetriggerError::Leased {
            id: m.id,
            status: m.status,
        }
        .into());
    }
    let Some(stage) = Stage::for_entry_status(m.status) else {
        return Err(RetriggerError::NoEntryStage {
            id: m.id,
            status: m.status,
        }
        .into());
    };

    let attempt = match stage {
        Stage::Validate => m.validation_attempts.max(0) as u32 + 1,
        _ => 1,
    };
    let job = StageJob::new(&m.id, stage, attempt);
    queue.enqueue(job.clone()).await?;
    info!("retriggered {} at {}", m.id, m.status);
    Ok(job)
}
