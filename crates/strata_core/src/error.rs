//! Error types for the strata engine.

use std::io;
use std::path::PathBuf;
use strata_codec::CodecError;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Hot store error.
    #[error("storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),

    /// Segment codec error not tied to a specific file.
    #[error("codec error: {0}")]
    Codec(CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A segment or index file failed validation. The file cannot be
    /// trusted and has to be regenerated from its source.
    #[error("corrupt segment {}: {message}", path.display())]
    CorruptSegment {
        /// The offending file.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    /// An index file is missing or does not match its data file.
    #[error("index missing or stale: {}", path.display())]
    IndexStale {
        /// The index file that needs rebuilding.
        path: PathBuf,
    },

    /// The segment list changed in a way the single-writer design rules out.
    #[error("concurrent mutation conflict: {message}")]
    ConcurrentMutationConflict {
        /// What was observed.
        message: String,
    },

    /// The query reaches below the pruned boundary of a domain.
    #[error("{domain}: tx {requested} is below the retention boundary {pruned_to}")]
    RetentionViolation {
        /// Domain queried.
        domain: String,
        /// TxNum asked for.
        requested: u64,
        /// First TxNum still retained.
        pruned_to: u64,
    },

    /// A file set was left incomplete by an interrupted write.
    #[error("partial write: {}", path.display())]
    PartialWrite {
        /// A file of the incomplete set.
        path: PathBuf,
    },

    /// The operation was cancelled or timed out.
    #[error("operation cancelled")]
    Cancelled,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Invalid on-disk format or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Another process holds the data directory.
    #[error("data directory locked: another process has exclusive access")]
    DataDirLocked,

    /// The aggregator has been closed.
    #[error("aggregator is closed")]
    Closed,
}

impl From<CodecError> for CoreError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Cancelled => Self::Cancelled,
            CodecError::Io(e) => Self::Io(e),
            other => Self::Codec(other),
        }
    }
}

impl CoreError {
    /// Attaches a file path to a codec error, turning corruption into
    /// [`CoreError::CorruptSegment`].
    pub fn from_codec(path: impl Into<PathBuf>, err: CodecError) -> Self {
        if err.is_corruption() {
            Self::CorruptSegment {
                path: path.into(),
                message: err.to_string(),
            }
        } else {
            Self::from(err)
        }
    }

    /// Creates a corrupt segment error.
    pub fn corrupt_segment(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptSegment {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an index stale error.
    pub fn index_stale(path: impl Into<PathBuf>) -> Self {
        Self::IndexStale { path: path.into() }
    }

    /// Creates a concurrent mutation conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::ConcurrentMutationConflict {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for cancellation and timeouts.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if the error is resolved by rebuilding indices.
    #[must_use]
    pub fn is_index_stale(&self) -> bool {
        matches!(self, Self::IndexStale { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_corruption_gets_path() {
        let err = CoreError::from_codec("/tmp/x.kv", CodecError::corrupt("bad"));
        assert!(matches!(err, CoreError::CorruptSegment { .. }));
        assert!(err.to_string().contains("/tmp/x.kv"));
    }

    #[test]
    fn codec_cancel_maps_to_cancelled() {
        let err: CoreError = CodecError::Cancelled.into();
        assert!(err.is_cancelled());
        let err = CoreError::from_codec("/tmp/x.kv", CodecError::Cancelled);
        assert!(err.is_cancelled());
    }

    #[test]
    fn retention_message() {
        let err = CoreError::RetentionViolation {
            domain: "accounts".into(),
            requested: 5,
            pruned_to: 100,
        };
        assert_eq!(
            err.to_string(),
            "accounts: tx 5 is below the retention boundary 100"
        );
    }
}
