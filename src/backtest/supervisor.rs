use crate::backtest::queue::{DbTaskQueue, Stage, StageJob, TaskQueue};
use crate::notify::Notifier;
use crate::storage::repository::{BacktestRequestRepository, RepoError};
use chrono::Utc;
use log::{error, info, warn};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Longest a stage may hold a request's lease.
    pub stage_budget: Duration,
    /// Unleased, non-terminal requests idle this long get their entry job queued again.
    pub requeue_after: Duration,
    pub interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stage_budget: Duration::from_secs(40 * 60),
            requeue_after: Duration::from_secs(10 * 60),
            interval: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub timed_out: usize,
    pub released: usize,
    pub requeued: usize,
}

/// Periodic sweep that bounds how long any request can sit in a non-terminal status.
pub struct Supervisor {
    db: Arc<DatabaseConnection>,
    queue: Arc<dyn TaskQueue>,
    notifier: Notifier,
    cfg: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        queue: Arc<dyn TaskQueue>,
        notifier: Notifier,
        cfg: SupervisorConfig,
    ) -> Self {
        Self {
            db,
            queue,
            notifier,
            cfg,
        }
    }

    pub async fn sweep(&self, now: i64) -> Result<SweepReport, RepoError> {
        let mut report = SweepReport::default();

        let budget = self.cfg.stage_budget.as_secs() as i64;
        for row in BacktestRequestRepository::find_leased_before(&self.db, now - budget).await? {
            if row.status.is_terminal() {
                continue;
            }
            match row.status.failure_state() {
                Some(to) => {
                    let msg = format!(
                        "Stage {} exceeded its time budget of {}s",
                        row.status, budget
                    );
                    match BacktestRequestRepository::force_transition(
                        &self.db,
                        &row.id,
                        row.version,
                        row.status,
                        to,
                        &msg,
                    )
                    .await
                    {
                        Ok(updated) => {
                            warn!("{}: {}", row.id, msg);
                            self.notifier.publish(&updated).await;
                            report.timed_out += 1;
                        }
                        // the owning worker moved it in the meantime
                        Err(RepoError::StaleState { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    if BacktestRequestRepository::force_release(&self.db, &row.id, row.version)
                        .await?
                    {
                        warn!("{}: released an expired lease at {}", row.id, row.status);
                        report.released += 1;
                    }
                }
            }
        }

        let idle = self.cfg.requeue_after.as_secs() as i64;
        for row in BacktestRequestRepository::find_stale(&self.db, now - idle).await? {
            if row.lease_token.is_some() {
                continue;
            }
            let Some(stage) = Stage::for_entry_status(row.status) else {
                continue;
            };
            let attempt = match stage {
                Stage::Validate => row.validation_attempts.max(0) as u32 + 1,
                _ => 1,
            };
            match self.queue.enqueue(StageJob::new(&row.id, stage, attempt)).await {
                Ok(()) => {
                    info!("{}: requeued {} after {}s idle", row.id, stage, now - row.updated_at);
                    report.requeued += 1;
                }
                Err(e) => error!("{}: requeue of {} failed: {}", row.id, stage, e),
            }
        }

        Ok(report)
    }

    /// Runs [`Supervisor::sweep`] every interval and returns stale queue claims to the queue.
    pub fn spawn(self, jobs: DbTaskQueue) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.cfg.interval);
            loop {
                ticker.tick().await;
                let now = Utc::now().timestamp();
                match self.sweep(now).await {
                    Ok(r) if r != SweepReport::default() => info!("supervisor sweep: {:?}", r),
                    Ok(_) => {}
                    Err(e) => error!("supervisor sweep failed: {}", e),
                }
                let claimed_before = now - self.cfg.stage_budget.as_secs() as i64;
                match jobs.reset_stale(claimed_before).await {
                    Ok(n) if n > 0 => info!("redelivering {} abandoned jobs", n),
                    Ok(_) => {}
                    Err(e) => error!("job reset failed: {}", e),
                }
            }
        })
    }
}
