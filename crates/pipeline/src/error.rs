//! Error types for the orchestration layer

use sleep_types::{ErrorKind, SleepError};
use thiserror::Error;

/// Orchestration errors: core failures plus configuration loading.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] SleepError),

    #[error("Invalid run configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("JSON error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PipelineError {
    /// Stable kind of this error. Configuration problems are reported as `INVALID_INPUT`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Core(e) => e.kind(),
            _ => ErrorKind::InvalidInput,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        PipelineError::InvalidConfiguration { message: message.into() }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
