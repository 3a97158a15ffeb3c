//! Error types shared by every collaborator implementation.

use thiserror::Error;

/// Result type alias for collaborator operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors a queue, object store, or fleet controller can report.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("receipt handle is invalid or expired: {0}")]
    InvalidReceipt(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// True when the failure concerns a missing object rather than the
    /// store itself.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::ObjectNotFound { .. })
    }
}
