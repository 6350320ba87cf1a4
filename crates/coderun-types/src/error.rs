//! Error types for protocol decoding.

use thiserror::Error;

/// Errors that can occur while decoding client frames.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The frame was not valid JSON for the expected shape.
    #[error("Malformed message: {message}")]
    Malformed { message: String },

    /// The handshake frame carried a `type` other than `init`.
    #[error("Unexpected message type: {message_type}")]
    UnexpectedType { message_type: String },
}

impl ProtocolError {
    /// Create a new malformed-message error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Create a new unexpected-type error.
    pub fn unexpected_type(message_type: impl Into<String>) -> Self {
        Self::UnexpectedType {
            message_type: message_type.into(),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::malformed(err.to_string())
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
