pub mod backtest_request;
pub mod pipeline_job;

pub use backtest_request::Entity as BacktestRequest;
pub use pipeline_job::Entity as PipelineJob;
