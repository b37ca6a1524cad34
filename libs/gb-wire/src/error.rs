//! Error types for encoding and decoding frames.

use thiserror::Error;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// Socket failure, or a length prefix above the frame limit.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame body was not a valid message.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl WireError {
    /// Returns true when the peer sent something we could not understand, as
    /// opposed to the connection itself failing.
    pub fn is_malformed(&self) -> bool {
        match self {
            WireError::Codec(_) => true,
            WireError::Io(err) => err.kind() == std::io::ErrorKind::InvalidData,
        }
    }
}

/// Shorthand result alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;
