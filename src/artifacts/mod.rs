pub mod local;

pub use local::LocalArtifactStore;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

pub const CONTENT_TYPE_PYTHON: &str = "text/x-python";
pub const CONTENT_TYPE_CSV: &str = "text/csv";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_MARKDOWN: &str = "text/markdown";

#[derive(thiserror::Error, Debug)]
pub enum ArtifactError {
    #[error("invalid artifact key: {0}")]
    InvalidKey(String),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("artifact {key} is not valid utf-8")]
    NotText { key: String },
    #[error("artifact io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Durable blob storage for scripts, datasets, logs and reports.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str)
        -> Result<(), ArtifactError>;

    async fn download(&self, key: &str, local_path: &Path) -> Result<(), ArtifactError>;

    async fn get_content(&self, key: &str) -> Result<String, ArtifactError>;

    fn url_for(&self, key: &str, ttl: Duration) -> Result<String, ArtifactError>;
}

/// Deterministic per-request artifact keys.
pub struct ArtifactKeys;

impl ArtifactKeys {
    pub fn script(id: &str) -> String {
        format!("{id}/script.py")
    }

    pub fn validation_data(id: &str) -> String {
        format!("{id}/validation_data.csv")
    }

    pub fn full_data(id: &str) -> String {
        format!("{id}/full_data.csv")
    }

    pub fn log(id: &str) -> String {
        format!("{id}/backtest.log")
    }

    pub fn report(id: &str) -> String {
        format!("{id}/report.md")
    }
}

/// Keys are relative, `/`-separated, without empty, `.` or `..` segments.
pub fn validate_key(key: &str) -> Result<(), ArtifactError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(ArtifactError::InvalidKey(key.to_string()));
    }
    Ok(())
}
