//! The sealed form of a block payload.

use crate::cipher::{Cipher, NONCE_SIZE, TAG_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{generate_salt, EncryptionKey, SALT_SIZE};
use crate::profile::Profile;
use serde::{Deserialize, Serialize};

/// Ciphertext, nonce, salt and profile tag, always carried together.
///
/// Everything outside this crate treats an envelope as opaque bytes. Two
/// envelopes are the same record only if their ciphertexts match exactly,
/// which the client relies on to address queued writes.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Envelope {
    /// AES-256-GCM output including the tag.
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    /// Per-seal random nonce.
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
    /// Per-block KDF salt.
    #[serde(with = "serde_bytes")]
    pub salt: Vec<u8>,
    /// Profile the key was derived under.
    pub profile: Profile,
}

impl Envelope {
    /// Derives a key from `password` under `profile` with a fresh salt and
    /// seals `plaintext` with it.
    pub fn seal(password: &[u8], profile: Profile, plaintext: &[u8]) -> CryptoResult<Self> {
        let salt = generate_salt();
        let key = EncryptionKey::derive(password, &salt, profile)?;
        Self::seal_with_key(&key, salt, profile, plaintext)
    }

    /// Seals `plaintext` with an already derived key.
    ///
    /// `salt` and `profile` must be the ones `key` was derived with, or the
    /// envelope will never open.
    pub fn seal_with_key(
        key: &EncryptionKey,
        salt: [u8; SALT_SIZE],
        profile: Profile,
        plaintext: &[u8],
    ) -> CryptoResult<Self> {
        let (ciphertext, nonce) = Cipher::new(key).seal(plaintext)?;
        Ok(Self {
            ciphertext,
            nonce: nonce.to_vec(),
            salt: salt.to_vec(),
            profile,
        })
    }

    /// Re-derives the key from `password` and opens the envelope.
    ///
    /// The envelope itself is never modified, whatever the outcome.
    pub fn open(&self, password: &[u8]) -> CryptoResult<Vec<u8>> {
        self.validate()?;
        let key = EncryptionKey::derive(password, &self.salt, self.profile)?;
        self.open_with_key(&key)
    }

    /// Opens the envelope with an already derived key.
    pub fn open_with_key(&self, key: &EncryptionKey) -> CryptoResult<Vec<u8>> {
        Cipher::new(key).open(&self.ciphertext, &self.nonce)
    }

    /// Checks the sealed-form invariants: non-empty ciphertext of at least a
    /// tag, a 12-byte nonce and a 16-byte salt.
    pub fn validate(&self) -> CryptoResult<()> {
        if self.ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::InvalidEnvelope(
                "ciphertext shorter than authentication tag".into(),
            ));
        }
        if self.nonce.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidEnvelope(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                self.nonce.len()
            )));
        }
        if self.salt.len() != SALT_SIZE {
            return Err(CryptoError::InvalidEnvelope(format!(
                "salt must be {} bytes, got {}",
                SALT_SIZE,
                self.salt.len()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("nonce_len", &self.nonce.len())
            .field("salt_len", &self.salt.len())
            .field("profile", &self.profile)
            .finish()
    }
}
