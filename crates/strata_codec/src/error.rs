//! Error types for the codec crate.

use std::io;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while writing or reading segment files.
#[derive(Error, Debug)]
pub enum CodecError {
    /// I/O error while reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is malformed or truncated.
    #[error("corrupt segment: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// The file was written by a different format version.
    #[error("unsupported segment version: found {found}, expected {expected}")]
    UnsupportedVersion {
        /// Version found in the file header.
        found: u16,
        /// Version this reader understands.
        expected: u16,
    },

    /// Stored checksum does not match the file contents.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the file.
        expected: u32,
        /// Checksum computed over the file.
        actual: u32,
    },

    /// `next`/`skip` called on an exhausted getter.
    #[error("no more words in segment")]
    NoMoreWords,

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl CodecError {
    /// Creates a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Returns true if the error means the file content cannot be trusted.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corrupt { .. } | Self::UnsupportedVersion { .. } | Self::ChecksumMismatch { .. }
        )
    }
}
