//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced while encoding, decoding or validating wire data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Bytes did not decode into the expected message.
    #[error("decode error: {0}")]
    Decode(String),

    /// A block violates the data model.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// Unexpected message for the current call.
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// What the caller was waiting for.
        expected: &'static str,
        /// What arrived instead.
        actual: String,
    },
}
