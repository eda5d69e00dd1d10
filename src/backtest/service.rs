use crate::backtest::model::StageOutcome;
use crate::backtest::pipeline::BacktestPipeline;
use crate::backtest::queue::DbTaskQueue;
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Long-running workers that pull stage jobs off the shared queue.
pub struct WorkerPool {
    pipeline: Arc<BacktestPipeline>,
    queue: DbTaskQueue,
    worker_count: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        pipeline: Arc<BacktestPipeline>,
        queue: DbTaskQueue,
        worker_count: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pipeline,
            queue,
            worker_count: worker_count.max(1),
            poll_interval,
        }
    }

    /// Startup recovery: jobs claimed longer than `older_than` ago by a worker that never
    /// acknowledged them go back to queued.
    pub async fn recover(&self, older_than: Duration) {
        info!("recovering interrupted stage jobs...");
        let horizon = Utc::now().timestamp() - older_than.as_secs() as i64;
        match self.queue.reset_stale(horizon).await {
            Ok(n) if n > 0 => info!("requeued {} interrupted jobs", n),
            Ok(_) => info!("no interrupted jobs found"),
            Err(e) => error!("job recovery failed: {}", e),
        }
    }

    pub fn start(&self) -> Vec<JoinHandle<()>> {
        (0..self.worker_count)
            .map(|idx| {
                let worker_id = format!("w{}", idx + 1);
                let pipeline = self.pipeline.clone();
                let queue = self.queue.clone();
                let poll = self.poll_interval;
                tokio::spawn(async move {
                    loop {
                        if !Self::tick(&worker_id, &pipeline, &queue).await {
                            sleep(jittered(poll)).await;
                        }
                    }
                })
            })
            .collect()
    }

    /// Claims and runs one job. Returns `false` when there was nothing to do.
    pub async fn tick(worker_id: &str, pipeline: &BacktestPipeline, queue: &DbTaskQueue) -> bool {
        let (job_id, job) = match queue.claim_next(worker_id).await {
            Ok(Some(j)) => j,
            Ok(None) => return false,
            Err(e) => {
                warn!("[{}] claim_next failed: {}", worker_id, e);
                return false;
            }
        };

        info!(
            "[{}] job {}: {} #{} for {}",
            worker_id, job_id, job.stage, job.attempt, job.request_id
        );
        let result = pipeline.run_job(&job).await;
        let ack = match &result {
            Ok(StageOutcome::Failed(status)) => {
                info!("[{}] request {} ended at {}", worker_id, job.request_id, status);
                queue.mark_done(job_id).await
            }
            Ok(_) => queue.mark_done(job_id).await,
            Err(e) => {
                // the request row could not be read or written; the supervisor will pick it up
                error!("[{}] job {} aborted: {}", worker_id, job_id, e);
                queue.mark_failed(job_id, &e.to_string()).await
            }
        };
        if let Err(e) = ack {
            error!("[{}] failed to acknowledge job {}: {}", worker_id, job_id, e);
        }
        true
    }
}

/// Idle sleep with up to 20% jitter so workers do not poll in lockstep.
fn jittered(base: Duration) -> Duration {
    let ms = base.as_millis() as u64;
    let extra = (ms / 5) * (rand::random::<u8>() as u64 % 5) / 5;
    Duration::from_millis(ms + extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_a_fifth() {
        let base = Duration::from_millis(500);
        for _ in 0..50 {
            let d = jittered(base);
            assert!(d >= base && d <= base + base / 5);
        }
    }
}
