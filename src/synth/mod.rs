pub mod parser;
pub mod prompt;
pub mod service;

pub use service::{LlmSynthesizer, SynthModels};

use crate::ai::LlmError;
use async_trait::async_trait;

pub const FALLBACK_TITLE: &str = "Custom Trading Strategy";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedScript {
    pub script: String,
    pub data_columns: Vec<String>,
}

/// The LLM-backed collaborators of the pipeline: script, repair, report and title synthesis.
#[async_trait]
pub trait StrategySynthesizer: Send + Sync {
    /// Never fails; falls back to [`FALLBACK_TITLE`].
    async fn strategy_title(&self, description: &str) -> String;

    /// `Ok(None)` when the model cannot produce a script for the description.
    async fn synthesize_script(
        &self,
        description: &str,
        columns_hint: &str,
    ) -> Result<Option<GeneratedScript>, LlmError>;

    /// `Ok(None)` when the model declines to repair.
    async fn repair_script(&self, script: &str, error: &str) -> Result<Option<String>, LlmError>;

    async fn synthesize_report(&self, log_text: &str) -> Result<String, LlmError>;
}

pub fn columns_hint(instrument: &str, columns: &[String]) -> String {
    if columns.is_empty() {
        format!("No data columns are available for {instrument} in the requested date range.")
    } else {
        format!(
            "Available data columns for {instrument}: {}. Only use these columns.",
            columns.join(", ")
        )
    }
}
