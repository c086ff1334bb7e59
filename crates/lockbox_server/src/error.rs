//! Error types for the sync server.

use lockbox_protocol::{ProtocolError, Response, StatusCode};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request or block.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, invalid or expired credentials, or a wrong password.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The user or subscription does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The user already exists, or the subscription is already streaming.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A stream reached its deadline.
    #[error("stream deadline exceeded")]
    DeadlineExceeded,

    /// The server is shutting down.
    #[error("server unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wire format error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns the wire status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Protocol(_) => {
                StatusCode::InvalidArgument
            }
            ServerError::Unauthenticated(_) => StatusCode::Unauthenticated,
            ServerError::NotFound(_) => StatusCode::NotFound,
            ServerError::AlreadyExists(_) => StatusCode::AlreadyExists,
            ServerError::DeadlineExceeded => StatusCode::DeadlineExceeded,
            ServerError::Unavailable(_) => StatusCode::Unavailable,
            ServerError::Internal(_) | ServerError::Io(_) => StatusCode::Internal,
        }
    }

    /// Returns true if the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::Unauthenticated(_)
                | ServerError::NotFound(_)
                | ServerError::AlreadyExists(_)
                | ServerError::Protocol(_)
        )
    }

    /// Returns true if this is a server-side failure.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_) | ServerError::Io(_))
    }

    /// Converts into the error frame sent to the client.
    ///
    /// Server-side failures carry only a generic message.
    pub fn to_response(&self) -> Response {
        let message = if self.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        Response::error(self.status_code(), message)
    }
}
