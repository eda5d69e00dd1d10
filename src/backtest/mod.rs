pub mod model;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod stages;
pub mod status;
pub mod supervisor;

pub use model::{FailureKind, PublicBacktest, StageError, StageOutcome};
pub use pipeline::{BacktestPipeline, PipelineConfig};
pub use queue::{DbTaskQueue, QueueError, Stage, StageJob, TaskQueue};
pub use service::WorkerPool;
pub use status::BacktestStatus;
pub use supervisor::{Supervisor, SupervisorConfig, SweepReport};
