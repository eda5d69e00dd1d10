use crate::backtest::status::BacktestStatus;
use crate::storage::repository::{JobRepository, JobStats};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use sea_orm::DatabaseConnection;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    GenerateScript,
    Validate,
    Execute,
    Report,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateScript => "generate_script",
            Self::Validate => "validate",
            Self::Execute => "execute",
            Self::Report => "report",
        }
    }

    /// Status a request must be at for this stage to claim it.
    pub fn entry_status(&self) -> BacktestStatus {
        match self {
            Self::GenerateScript => BacktestStatus::Pending,
            Self::Validate => BacktestStatus::ReadyForValidation,
            Self::Execute => BacktestStatus::Executing,
            Self::Report => BacktestStatus::GeneratingReport,
        }
    }

    /// Inverse of [`entry_status`](Self::entry_status).
    pub fn for_entry_status(status: BacktestStatus) -> Option<Stage> {
        match status {
            BacktestStatus::Pending => Some(Self::GenerateScript),
            BacktestStatus::ReadyForValidation => Some(Self::Validate),
            BacktestStatus::Executing => Some(Self::Execute),
            BacktestStatus::GeneratingReport => Some(Self::Report),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate_script" => Ok(Self::GenerateScript),
            "validate" => Ok(Self::Validate),
            "execute" => Ok(Self::Execute),
            "report" => Ok(Self::Report),
            other => Err(QueueError::UnknownStage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageJob {
    pub request_id: String,
    pub stage: Stage,
    /// Advisory; the validator derives the real attempt from the request row.
    pub attempt: u32,
}

impl StageJob {
    pub fn new(request_id: impl Into<String>, stage: Stage, attempt: u32) -> Self {
        Self {
            request_id: request_id.into(),
            stage,
            attempt,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("unknown stage '{0}'")]
    UnknownStage(String),
}

/// At-least-once delivery of stage jobs.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, job: StageJob) -> Result<(), QueueError>;
}

/// `pipeline_jobs`-backed queue shared by every worker on the same database.
#[derive(Clone)]
pub struct DbTaskQueue {
    db: Arc<DatabaseConnection>,
}

impl DbTaskQueue {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<(i32, StageJob)>, QueueError> {
        let now = Utc::now().timestamp();
        let Some(row) = JobRepository::claim_next(&self.db, worker_id, now).await? else {
            return Ok(None);
        };
        match row.stage.parse::<Stage>() {
            Ok(stage) => Ok(Some((
                row.id,
                StageJob::new(row.request_id, stage, row.attempt.max(1) as u32),
            ))),
            Err(e) => {
                warn!("job {} has {}; marking failed", row.id, e);
                JobRepository::mark_failed(&self.db, row.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    pub async fn mark_done(&self, job_id: i32) -> Result<(), QueueError> {
        Ok(JobRepository::mark_done(&self.db, job_id).await?)
    }

    pub async fn mark_failed(&self, job_id: i32, message: &str) -> Result<(), QueueError> {
        Ok(JobRepository::mark_failed(&self.db, job_id, message).await?)
    }

    /// Requeues jobs claimed before `claimed_before` whose worker never finished them.
    pub async fn reset_stale(&self, claimed_before: i64) -> Result<u64, QueueError> {
        Ok(JobRepository::reset_stale_jobs(&self.db, claimed_before).await?)
    }

    pub async fn stats(&self) -> Result<JobStats, QueueError> {
        Ok(JobRepository::stats(&self.db).await?)
    }
}

#[async_trait]
impl TaskQueue for DbTaskQueue {
    async fn enqueue(&self, job: StageJob) -> Result<(), QueueError> {
        let inserted = JobRepository::enqueue(
            &self.db,
            &job.request_id,
            job.stage.as_str(),
            job.attempt as i32,
        )
        .await?;
        match inserted {
            Some(id) => debug!("queued {} #{} for {} as job {}", job.stage, job.attempt, job.request_id, id),
            None => debug!("{} #{} for {} already queued", job.stage, job.attempt, job.request_id),
        }
        Ok(())
    }
}
