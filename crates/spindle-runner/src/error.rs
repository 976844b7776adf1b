//! Error types for the Spindle runner

use spindle_core::config::BackendKind;
use thiserror::Error;

/// Runner error types
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Core engine error: {0}")]
    Core(#[from] spindle_core::CoreError),

    #[error("Backend '{0}' is not available")]
    BackendUnavailable(BackendKind),

    #[error("Adapter '{adapter}' is not supported by the {backend} backend")]
    AdapterUnsupported { adapter: String, backend: BackendKind },

    #[error("Batched engine error: {0}")]
    Batched(#[source] anyhow::Error),

    #[error("Logging setup error: {0}")]
    Logging(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;

impl RunnerError {
    /// Whether the request was refused before any generation work started
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Core(err) => err.is_rejection(),
            Self::BackendUnavailable(_) | Self::AdapterUnsupported { .. } => true,
            _ => false,
        }
    }

    /// Whether the generation was cancelled through its token
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Core(err) if err.is_cancelled())
    }
}
