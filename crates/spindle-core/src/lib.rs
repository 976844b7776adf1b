//! Spindle Core - single-request decode engine
//!
//! This crate turns a prompt's token ids into an incrementally produced,
//! stoppable stream of generated text. It owns the prefill + decode loop,
//! the logits processing pipeline, token selection and stop-sequence
//! detection, and it releases the model's incremental cache on every exit
//! path.

// Module declarations
pub mod config;
pub mod engine;
pub mod generation;
pub mod logits;
pub mod model;
pub mod sampler;
pub mod sampling;
pub mod stop;
pub mod stream;
pub mod tokenizer;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Engine or request configuration errors, raised before any model call
    #[error("Configuration error [{code}]: {message}\nContext: {context}\nSuggestion: {suggestion}")]
    Configuration {
        code: &'static str,
        message: String,
        context: String,
        suggestion: String,
        config_path: Option<std::path::PathBuf>,
        field_name: Option<String>,
    },

    /// Input validation and parameter errors
    #[error("Invalid input [{code}]: {message}\nContext: {context}\nSuggestion: {suggestion}")]
    InvalidInput {
        code: &'static str,
        message: String,
        context: String,
        suggestion: String,
        parameter_name: Option<String>,
        value: Option<String>,
        valid_range: Option<String>,
    },

    /// Model invocation failures during prefill or decode, including
    /// resource exhaustion reported by the model
    #[error("Model error [{code}]: {message}\nContext: {context}\nSuggestion: {suggestion}")]
    Model {
        code: &'static str,
        message: String,
        context: String,
        suggestion: String,
        step: Option<usize>,
    },

    /// Detokenization errors
    #[error("Tokenizer error [{code}]: {message}\nContext: {context}\nSuggestion: {suggestion}")]
    Tokenizer {
        code: &'static str,
        message: String,
        context: String,
        suggestion: String,
        tokenizer_type: Option<String>,
    },

    /// Decode loop errors, including cooperative cancellation
    #[error("Generation error [{code}]: {message}\nContext: {context}\nSuggestion: {suggestion}")]
    Generation {
        code: &'static str,
        message: String,
        context: String,
        suggestion: String,
        request_id: Option<String>,
    },

    /// File system and I/O errors
    #[error("IO error [{code}]: {message}\nPath: {path:?}\nSuggestion: {suggestion}")]
    Io {
        code: &'static str,
        message: String,
        path: Option<std::path::PathBuf>,
        suggestion: String,
        #[source]
        source: std::io::Error,
    },

    /// Other unexpected errors
    #[error("Internal error [{code}]: {message}\nContext: {context}")]
    Internal {
        code: &'static str,
        message: String,
        context: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Error code used when a generation is cancelled through its token.
pub const CANCELLED_CODE: &str = "GENERATION_CANCELLED";

impl CoreError {
    /// Create a configuration error
    pub fn configuration<S1, S2, S3>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::Configuration {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            config_path: None,
            field_name: None,
        }
    }

    /// Create a configuration error tied to a config file
    pub fn configuration_with_path<S1, S2, S3, P>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
        path: P,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
        P: Into<std::path::PathBuf>,
    {
        Self::Configuration {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            config_path: Some(path.into()),
            field_name: None,
        }
    }

    /// Create an invalid input error
    pub fn invalid_input<S1, S2, S3>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::InvalidInput {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            parameter_name: None,
            value: None,
            valid_range: None,
        }
    }

    /// Create an invalid input error with parameter validation details
    pub fn invalid_parameter<S1, S2, S3, S4, S5, S6>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
        param_name: S4,
        value: S5,
        valid_range: S6,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
        S4: Into<String>,
        S5: Into<String>,
        S6: Into<String>,
    {
        Self::InvalidInput {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            parameter_name: Some(param_name.into()),
            value: Some(value.into()),
            valid_range: Some(valid_range.into()),
        }
    }

    /// Create a model invocation error
    pub fn model<S1, S2, S3>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::Model {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            step: None,
        }
    }

    /// Create a tokenizer error
    pub fn tokenizer<S1, S2, S3>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::Tokenizer {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            tokenizer_type: None,
        }
    }

    /// Create a generation error
    pub fn generation<S1, S2, S3>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::Generation {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            request_id: None,
        }
    }

    /// Create the error reported when a generation observes its cancellation token
    pub fn cancelled(request_id: &str, step: usize) -> Self {
        Self::Generation {
            code: CANCELLED_CODE,
            message: format!("Generation cancelled before step {}", step),
            context: "Cooperative cancellation check".to_string(),
            suggestion: "Resubmit the request if the output is still needed".to_string(),
            request_id: Some(request_id.to_string()),
        }
    }

    /// Attach the decode step at which a model invocation failed
    pub fn at_step(self, at: usize) -> Self {
        match self {
            Self::Model {
                code,
                message,
                context,
                suggestion,
                ..
            } => Self::Model {
                code,
                message,
                context,
                suggestion,
                step: Some(at),
            },
            other => other,
        }
    }

    /// Get the error code for programmatic handling
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { code, .. } => code,
            Self::InvalidInput { code, .. } => code,
            Self::Model { code, .. } => code,
            Self::Tokenizer { code, .. } => code,
            Self::Generation { code, .. } => code,
            Self::Io { code, .. } => code,
            Self::Internal { code, .. } => code,
        }
    }

    /// Whether the request was rejected before any model invocation
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::InvalidInput { .. })
    }

    /// Whether this error came from a cancellation token
    pub fn is_cancelled(&self) -> bool {
        self.code() == CANCELLED_CODE
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        let (code, suggestion) = match err.kind() {
            std::io::ErrorKind::NotFound => (
                "IO_FILE_NOT_FOUND",
                "Check that the file path is correct and the file exists",
            ),
            std::io::ErrorKind::PermissionDenied => (
                "IO_PERMISSION_DENIED",
                "Check file permissions or run with appropriate privileges",
            ),
            std::io::ErrorKind::InvalidData => (
                "IO_INVALID_DATA",
                "The file may be corrupted or in an unexpected format",
            ),
            _ => (
                "IO_UNKNOWN",
                "Check the file system and try the operation again",
            ),
        };

        Self::Io {
            code,
            message: err.to_string(),
            path: None,
            suggestion: suggestion.to_string(),
            source: err,
        }
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            code: "INTERNAL_UNKNOWN",
            message: err.to_string(),
            context: "An unexpected error occurred".to_string(),
            source: Some(err),
        }
    }
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        config::{BackendKind, EngineConfig, LoggingConfig},
        engine::DecodeEngine,
        generation::{
            CompletionChunk, FinishReason, GenerationOutput, GenerationRequest,
            GenerationRequestBuilder,
        },
        logits::LogitsProcessor,
        model::{LanguageModel, ModelOutput},
        sampler::{Sampler, TokenSelection},
        sampling::{SamplingConfig, SamplingOverrides},
        stop::{find_stop, StopMatch, StopOutcome, StopSequences},
        stream::DecodeStream,
        tokenizer::{DecodeOptions, Tokenizer, VocabTokenizer},
        CoreError, Result,
    };
}

// Re-export key types at the crate root
pub use config::EngineConfig;
pub use engine::DecodeEngine;
pub use generation::{CompletionChunk, FinishReason, GenerationOutput, GenerationRequest};
pub use sampling::SamplingConfig;
pub use stream::DecodeStream;

pub mod error {
    pub use super::{CoreError, Result};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CoreError::configuration(
            "ADAPTER_UNSUPPORTED",
            "Adapters are not supported",
            "Adapter selection",
            "Remove the adapter",
        );
        assert_eq!(err.code(), "ADAPTER_UNSUPPORTED");
        assert!(err.is_rejection());
        assert!(!err.is_cancelled());

        let err = CoreError::cancelled("req-1", 3);
        assert!(err.is_cancelled());
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_model_error_step() {
        let err = CoreError::model("FORWARD_FAILED", "boom", "Decode step", "Retry").at_step(4);
        match err {
            CoreError::Model { step, .. } => assert_eq!(step, Some(4)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resource_exhaustion_is_a_model_failure() {
        let err = CoreError::model(
            "MODEL_RESOURCE_EXHAUSTED",
            "cache capacity exceeded",
            "Decode step",
            "Shorten the prompt or lower max_new_tokens",
        )
        .at_step(2);
        assert!(matches!(err, CoreError::Model { step: Some(2), .. }));
        assert!(!err.is_rejection());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CoreError = io.into();
        assert_eq!(err.code(), "IO_FILE_NOT_FOUND");
    }
}
