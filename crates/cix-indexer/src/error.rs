//! Indexer error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during indexing operations.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed CIX document
    #[error("CIX error: {0}")]
    Cix(String),

    /// Persisted index could not be read back
    #[error("Index corrupted at {path}: {reason}")]
    IndexCorruption { path: PathBuf, reason: String },

    /// Path not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// No scanner registered for the language
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
}

impl From<rmp_serde::encode::Error> for IndexerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for IndexerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<roxmltree::Error> for IndexerError {
    fn from(e: roxmltree::Error) -> Self {
        IndexerError::Cix(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexerError::NotFound(PathBuf::from("/test/path"));
        assert!(err.to_string().contains("/test/path"));

        let err = IndexerError::IndexCorruption {
            path: PathBuf::from("/db/projs/abc/dirs_from_basename"),
            reason: "bad magic".to_string(),
        };
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: IndexerError = io_err.into();
        assert!(matches!(err, IndexerError::Io(_)));
    }
}
