use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the feature pipeline.
///
/// Decoding of archive sub-fields never produces one of these: malformed
/// values decay to `None` and only become an error once a required field is
/// still missing at normalization time.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required field '{field}' is missing and has no fallback")]
    MissingData { field: &'static str },

    #[error("feature width mismatch: expected {expected} columns, found {found}")]
    Shape { expected: usize, found: usize },

    #[error("sequence needs {needed} observations but only {available} are available")]
    InsufficientHistory { needed: usize, available: usize },

    #[error("{service} is unavailable: {reason}")]
    UpstreamUnavailable { service: &'static str, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to load artifact {}: {reason}", path.display())]
    Artifact { path: PathBuf, reason: String },
}

impl PipelineError {
    pub fn missing(field: &'static str) -> Self {
        PipelineError::MissingData { field }
    }

    pub fn upstream(service: &'static str, reason: impl ToString) -> Self {
        PipelineError::UpstreamUnavailable { service, reason: reason.to_string() }
    }

    /// Errors that the orchestration layer may answer with a fallback source.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingData { .. } | PipelineError::UpstreamUnavailable { .. }
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
