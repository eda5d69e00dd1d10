use crate::artifacts::ArtifactStore;
use crate::backtest::model::{FailureKind, StageError, StageOutcome};
use crate::backtest::queue::{Stage, StageJob, TaskQueue};
use crate::backtest::stages;
use crate::backtest::status::BacktestStatus;
use crate::market::MarketDataSource;
use crate::notify::Notifier;
use crate::sandbox::SandboxRunner;
use crate::storage::entity::backtest_request;
use crate::storage::repository::{ArtifactUrls, BacktestRequestRepository, RepoError, StatusUpdate};
use crate::synth::StrategySynthesizer;
use log::{error, info, warn};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub max_retry_attempts: u32,
    pub validation_sample_rows: usize,
    pub url_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            validation_sample_rows: 100,
            url_ttl: Duration::from_secs(3600),
        }
    }
}

/// The stage state machine. Every collaborator is injected; nothing here is global.
pub struct BacktestPipeline {
    pub(crate) db: Arc<DatabaseConnection>,
    pub(crate) artifacts: Arc<dyn ArtifactStore>,
    pub(crate) synth: Arc<dyn StrategySynthesizer>,
    pub(crate) market: Arc<dyn MarketDataSource>,
    pub(crate) sandbox: Arc<SandboxRunner>,
    pub(crate) queue: Arc<dyn TaskQueue>,
    pub(crate) notifier: Notifier,
    pub(crate) cfg: PipelineConfig,
}

impl BacktestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        artifacts: Arc<dyn ArtifactStore>,
        synth: Arc<dyn StrategySynthesizer>,
        market: Arc<dyn MarketDataSource>,
        sandbox: Arc<SandboxRunner>,
        queue: Arc<dyn TaskQueue>,
        notifier: Notifier,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            db,
            artifacts,
            synth,
            market,
            sandbox,
            queue,
            notifier,
            cfg,
        }
    }

    /// Runs one delivered job. Stage errors never escape: they become the request's
    /// terminal status. Only a failure to claim or to record that status is returned.
    pub async fn run_job(&self, job: &StageJob) -> Result<StageOutcome, RepoError> {
        let lease = uuid::Uuid::new_v4().to_string();
        let entry = job.stage.entry_status();
        let Some(request) =
            BacktestRequestRepository::claim(&self.db, &job.request_id, entry, &lease).await?
        else {
            info!(
                "skip {} for {}: not at {} or leased by another delivery",
                job.stage, job.request_id, entry
            );
            return Ok(StageOutcome::Skipped);
        };

        info!(
            "stage {} started for {} (job attempt {})",
            job.stage, job.request_id, job.attempt
        );
        let result = match job.stage {
            Stage::GenerateScript => stages::script::run(self, &request, &lease).await,
            Stage::Validate => stages::validate::run(self, &request, &lease, job).await,
            Stage::Execute => stages::execute::run(self, &request, &lease).await,
            Stage::Report => stages::report::run(self, &request, &lease).await,
        };

        match result {
            Ok(outcome) => {
                info!("stage {} for {} -> {:?}", job.stage, job.request_id, outcome);
                Ok(outcome)
            }
            Err(e) if e.kind == FailureKind::Superseded => {
                warn!("stage {} for {} lost its lease: {}", job.stage, job.request_id, e.message);
                Ok(StageOutcome::Skipped)
            }
            Err(e) => self.fail_stage(&job.request_id, &lease, e).await,
        }
    }

    /// Moves the request from wherever the stage stopped to that status's failure state.
    async fn fail_stage(
        &self,
        id: &str,
        lease: &str,
        err: StageError,
    ) -> Result<StageOutcome, RepoError> {
        error!("stage failed for {} ({:?}): {}", id, err.kind, err.message);

        let current = BacktestRequestRepository::get_by_id(&self.db, id).await?;
        if current.lease_token.as_deref() != Some(lease) {
            // already released (the failure came after a successful hand-off)
            return Ok(StageOutcome::Skipped);
        }

        let Some(to) = current.status.failure_state() else {
            BacktestRequestRepository::release_lease(&self.db, id, lease).await?;
            warn!(
                "{} has no failure state from {}; lease released for redelivery",
                id, current.status
            );
            return Ok(StageOutcome::Skipped);
        };

        let message = if err.message.trim().is_empty() {
            format!("{:?} failure", err.kind)
        } else {
            err.message
        };
        let updated = BacktestRequestRepository::transition(
            &self.db,
            id,
            lease,
            current.status,
            to,
            StatusUpdate::failure(message),
        )
        .await?;
        self.notifier.publish(&updated).await;
        Ok(StageOutcome::Failed(to))
    }

    /// Commits a transition under the lease and pushes the new public state.
    pub(crate) async fn advance(
        &self,
        id: &str,
        lease: &str,
        from: BacktestStatus,
        to: BacktestStatus,
        update: StatusUpdate,
    ) -> Result<backtest_request::Model, StageError> {
        let updated =
            BacktestRequestRepository::transition(&self.db, id, lease, from, to, update).await?;
        info!("{}: {} -> {}", id, from, to);
        self.notifier.publish(&updated).await;
        Ok(updated)
    }

    pub(crate) async fn enqueue(&self, job: StageJob) -> Result<(), StageError> {
        self.queue.enqueue(job).await?;
        Ok(())
    }

    /// Uploads an artifact and returns the URL clients should see.
    pub(crate) async fn store(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StageError> {
        self.artifacts.upload(key, bytes, content_type).await?;
        Ok(self.artifacts.url_for(key, self.cfg.url_ttl)?)
    }

    pub(crate) async fn set_urls(&self, id: &str, urls: ArtifactUrls) -> Result<(), StageError> {
        BacktestRequestRepository::update_artifact_urls(&self.db, id, urls).await?;
        Ok(())
    }
}
