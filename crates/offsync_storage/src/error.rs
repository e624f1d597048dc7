//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The key contains characters outside `[A-Za-z0-9._-]`.
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    /// Another process holds the state directory lock.
    #[error("state directory locked: another process has exclusive access")]
    Locked,

    /// The store has been closed or made unavailable.
    #[error("store is unavailable")]
    Unavailable,
}
