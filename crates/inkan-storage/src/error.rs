//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// The named profile does not exist.
    #[error("profile {0:?} not found")]
    ProfileNotFound(String),

    /// The profile name is not filesystem-safe.
    #[error("invalid profile name {0:?}")]
    InvalidName(String),

    /// A serial was reserved twice.
    #[error("serial {0} already exists")]
    AlreadyExists(u64),

    /// A commit arrived for a serial that was never reserved.
    #[error("serial {0} was never reserved")]
    NotReserved(u64),

    /// A commit arrived for an already-committed serial.
    #[error("serial {0} already committed")]
    AlreadyCommitted(u64),

    /// No journal entry exists for the serial.
    #[error("serial {0} not found")]
    SerialNotFound(u64),

    /// On-disk material exists but cannot be parsed.
    #[error("corrupt state in {path}: {reason}")]
    CorruptState {
        /// The offending file.
        path: PathBuf,
        /// What failed to parse.
        reason: String,
    },

    /// Underlying filesystem failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// The offending path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptState {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
