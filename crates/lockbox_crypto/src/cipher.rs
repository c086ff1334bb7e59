//! AES-256-GCM sealing with detached nonces.

use crate::error::{CryptoError, CryptoResult};
use crate::key::EncryptionKey;
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// An initialized AES-256-GCM cipher.
///
/// Unlike a combined `nonce || ciphertext` format, the nonce is returned
/// separately so it can be stored in its own envelope field.
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    /// Creates a cipher for the given key.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let key_array = GenericArray::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key_array),
        }
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    ///
    /// Returns `(ciphertext || tag, nonce)`.
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<(Vec<u8>, [u8; NONCE_SIZE])> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Encryption("aead seal failed".into()))?;

        Ok((ciphertext, nonce_bytes))
    }

    /// Decrypts and authenticates `ciphertext` under `nonce`.
    ///
    /// # Errors
    ///
    /// [`CryptoError::AuthenticationFailed`] if the tag does not verify,
    /// [`CryptoError::InvalidEnvelope`] if the nonce has the wrong size.
    pub fn open(&self, ciphertext: &[u8], nonce: &[u8]) -> CryptoResult<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidEnvelope(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                nonce.len()
            )));
        }
        // A ciphertext shorter than the tag cannot have come from `seal`.
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::AuthenticationFailed);
        }

        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").field("cipher", &"Aes256Gcm").finish()
    }
}

/// Seals `plaintext` with `key`. See [`Cipher::seal`].
pub fn seal(key: &EncryptionKey, plaintext: &[u8]) -> CryptoResult<(Vec<u8>, [u8; NONCE_SIZE])> {
    Cipher::new(key).seal(plaintext)
}

/// Opens `ciphertext` with `nonce` and `key`. See [`Cipher::open`].
pub fn open(ciphertext: &[u8], nonce: &[u8], key: &EncryptionKey) -> CryptoResult<Vec<u8>> {
    Cipher::new(key).open(ciphertext, nonce)
}
