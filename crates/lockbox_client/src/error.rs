//! Error types for the client.

use lockbox_crypto::CryptoError;
use lockbox_protocol::{ProtocolError, StatusCode};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network or transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Missing, invalid or expired token, or bad credentials.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The server has no such entity (user, subscription).
    #[error("not found: {0}")]
    NotFound(String),

    /// The entity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The server rejected the request as malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The stream reached its deadline.
    #[error("stream deadline exceeded")]
    DeadlineExceeded,

    /// The server failed or is shutting down.
    #[error("server error: {0}")]
    Server(String),

    /// Wrong password or tampered block.
    #[error("wrong password or tampered data")]
    WrongCredential,

    /// Other cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// Malformed or unexpected message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local state file could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// No session token; register or log in first.
    #[error("not logged in")]
    NotLoggedIn,
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        ClientError::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        ClientError::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps a wire status to an error.
    pub fn from_status(code: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            StatusCode::InvalidArgument => ClientError::InvalidArgument(message),
            StatusCode::Unauthenticated => ClientError::Unauthenticated(message),
            StatusCode::NotFound => ClientError::NotFound(message),
            StatusCode::AlreadyExists => ClientError::AlreadyExists(message),
            StatusCode::DeadlineExceeded => ClientError::DeadlineExceeded,
            StatusCode::Unavailable => ClientError::transport_retryable(message),
            StatusCode::Internal => ClientError::Server(message),
        }
    }

    /// Returns true if the failure is network-related and the operation may
    /// succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Transport {
                retryable: true,
                ..
            }
        )
    }

    /// Returns true if the server refused the credentials or token.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ClientError::Unauthenticated(_) | ClientError::NotLoggedIn)
    }
}

impl From<CryptoError> for ClientError {
    fn from(e: CryptoError) -> Self {
        if e.is_authentication_failure() {
            ClientError::WrongCredential
        } else {
            ClientError::Crypto(e)
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::transport_retryable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            ClientError::from_status(StatusCode::Unauthenticated, "x"),
            ClientError::Unauthenticated(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::DeadlineExceeded, "x"),
            ClientError::DeadlineExceeded
        ));
        assert!(ClientError::from_status(StatusCode::Unavailable, "x").is_transient());
        assert!(!ClientError::from_status(StatusCode::Internal, "x").is_transient());
    }

    #[test]
    fn crypto_auth_failure_is_wrong_credential() {
        let err: ClientError = CryptoError::AuthenticationFailed.into();
        assert!(matches!(err, ClientError::WrongCredential));

        let err: ClientError = CryptoError::InvalidEnvelope("nonce".into()).into();
        assert!(matches!(err, ClientError::Crypto(_)));
    }

    #[test]
    fn io_errors_are_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: ClientError = io.into();
        assert!(err.is_transient());
        assert!(!ClientError::transport_fatal("bad address").is_transient());
    }
}
