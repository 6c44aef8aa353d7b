//! IPC Error types

use thiserror::Error;

/// Errors that can occur during IPC operations
#[derive(Debug, Error)]
pub enum IpcError {
    /// IO error on the transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Length prefix exceeds the frame limit
    #[error("Frame too large: {0} bytes (max 16MB)")]
    FrameTooLarge(usize),

    /// The byte stream no longer lines up with frame boundaries
    #[error("Stream desynchronized: {0}")]
    Desynchronized(String),

    /// Frame body is neither MessagePack nor JSON for the expected type
    #[error("Deserialization failed: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    /// Failed to serialize message
    #[error("Serialization failed: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    /// Request timed out
    #[error("Request timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),

    /// Connection failed or was closed by the peer
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

impl IpcError {
    /// Whether the stream can no longer be read frame by frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::Io(_) | IpcError::FrameTooLarge(_) | IpcError::Desynchronized(_)
        )
    }
}
