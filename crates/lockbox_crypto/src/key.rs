//! Symmetric keys and password-based derivation.

use crate::error::{CryptoError, CryptoResult};
use crate::profile::Profile;
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the per-block KDF salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Encryption key for AES-256-GCM.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random encryption key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeySize {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives a key from a password and an existing salt.
    ///
    /// Uses Argon2id (v0x13) with the cost parameters of `profile`. The same
    /// password, salt and profile always produce the same key.
    pub fn derive(password: &[u8], salt: &[u8], profile: Profile) -> CryptoResult<Self> {
        let kdf = profile.kdf_params();
        let params = Params::new(
            kdf.mem_cost_kib,
            kdf.time_cost,
            kdf.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut bytes = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(password, salt, &mut bytes)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generates a fresh random salt.
#[must_use]
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derives a key from a password under `profile` with a fresh random salt.
///
/// The salt must be stored in the clear next to whatever the key seals.
pub fn derive_key(password: &[u8], profile: Profile) -> CryptoResult<(EncryptionKey, [u8; SALT_SIZE])> {
    let salt = generate_salt();
    let key = EncryptionKey::derive(password, &salt, profile)?;
    Ok((key, salt))
}
