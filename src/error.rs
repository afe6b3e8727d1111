//! Error types for the catalog pipeline

use thiserror::Error;

/// Problems with one subject's contour document.
///
/// `Malformed` is recoverable: the entry is committed without radio fields.
/// `InvariantViolation` aborts the entry.
#[derive(Error, Debug)]
pub enum ContourError {
    #[error("malformed contour document: {0}")]
    Malformed(String),

    #[error("contour JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures talking to an external collaborator (contour host, reference catalogs).
#[derive(Error, Debug)]
pub enum FetchError {
    /// The resource genuinely does not exist. Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Timeouts, 5xx responses, busy databases. Retried by [`crate::fetch::RetryPolicy`].
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Run-level failures that decide how `build-catalog` recovers.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Retries exhausted against an external service; the run pauses and resumes later.
    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    /// The durable store failed mid-scan; the run restarts with an idempotent re-scan.
    #[error("catalog store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Transient(msg) => PipelineError::ExternalUnavailable(msg),
            other => PipelineError::Other(other.to_string()),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
