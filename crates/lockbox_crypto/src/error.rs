//! Error types for envelope operations.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while deriving keys or sealing/opening envelopes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The authentication tag did not verify.
    ///
    /// Either the password (and therefore the key) is wrong or the
    /// ciphertext, nonce or salt was modified.
    #[error("authentication failed: wrong password or tampered data")]
    AuthenticationFailed,

    /// Key derivation rejected its inputs.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The cipher refused to seal the payload.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// An envelope field is missing or has the wrong size.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// A profile tag that is not one of the recognized values.
    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    /// Raw key material of the wrong length.
    #[error("invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },
}

impl CryptoError {
    /// Returns true if this error means the caller supplied the wrong secret
    /// (or the data was tampered with), as opposed to malformed input.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, CryptoError::AuthenticationFailed)
    }
}
