//! Error types for the sync engine.

use crate::queue::OperationId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network-level failure (DNS, refused connection, reset).
    ///
    /// A retryable failure makes the engine fall back to the cache or the
    /// write queue, and counts as one attempt for a queued write. A fatal one
    /// (a rejected certificate) is returned to the caller, and drops a queued
    /// write without retrying it.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The transport gave up waiting for a response.
    #[error("operation timed out")]
    Timeout,

    /// Durable storage error.
    #[error("storage error: {0}")]
    Storage(#[from] offsync_storage::StorageError),

    /// JSON encoding or decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The resource address could not be parsed.
    #[error("invalid resource address: {0:?}")]
    InvalidTarget(String),

    /// The method name is not one the engine understands.
    #[error("unknown method: {0}")]
    InvalidMethod(String),

    /// A non-mutating method was offered to the write queue.
    #[error("method {0} cannot be queued")]
    NotMutating(String),

    /// A queued write failed on every allowed attempt and was dropped.
    #[error("operation {id} dropped after {attempts} failed attempts")]
    RetriesExhausted {
        /// Identifier of the dropped operation.
        id: OperationId,
        /// Number of failed attempts.
        attempts: u32,
    },

    /// The engine has been closed.
    #[error("sync engine closed")]
    Closed,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error is a transport-level failure rather than
    /// an application or local error.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, SyncError::Transport { .. } | SyncError::Timeout)
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::Closed.is_retryable());
    }

    #[test]
    fn transport_failures() {
        assert!(SyncError::transport_fatal("dns").is_transport_failure());
        assert!(SyncError::Timeout.is_transport_failure());
        assert!(!SyncError::InvalidTarget("".into()).is_transport_failure());
        assert!(!SyncError::Closed.is_transport_failure());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Closed;
        assert_eq!(err.to_string(), "sync engine closed");

        let err = SyncError::NotMutating("GET".into());
        assert_eq!(err.to_string(), "method GET cannot be queued");
    }
}
