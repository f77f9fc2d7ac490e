//! Error types for hot-store operations.

use std::io;
use thiserror::Error;

/// Result type for hot-store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing the hot store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The commit did not become durable. Nothing from the transaction is
    /// visible.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// The store has been closed.
    #[error("hot store is closed")]
    Closed,
}
