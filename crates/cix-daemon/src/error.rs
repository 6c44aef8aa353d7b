//! Per-request failures and their wire error codes.

use cix_indexer::IndexerError;
use cix_ipc::ErrorCode;
use thiserror::Error;

/// Why a single request failed. Never fatal to the driver.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Indexer(#[from] IndexerError),

    /// IO error reading request input
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request exceeded a resource limit
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The request cannot be carried out as sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The driver stopped accepting work
    #[error("Driver is shutting down")]
    ShuttingDown,
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::Indexer(IndexerError::UnsupportedLanguage(_)) => {
                ErrorCode::UnsupportedLanguage
            }
            DispatchError::Indexer(IndexerError::NotFound(_)) => ErrorCode::NotFound,
            DispatchError::Indexer(IndexerError::Io(e)) | DispatchError::Io(e)
                if e.kind() == std::io::ErrorKind::NotFound =>
            {
                ErrorCode::NotFound
            }
            DispatchError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            DispatchError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            DispatchError::ShuttingDown => ErrorCode::ShuttingDown,
            _ => ErrorCode::InternalError,
        }
    }
}
