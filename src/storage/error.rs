//! Storage error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing persisted state
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error on {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the file exists but its contents could not be decoded
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Serialization { .. })
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
