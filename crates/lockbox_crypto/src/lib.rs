//! # Lockbox Crypto
//!
//! Password-based envelopes for Lockbox secret blocks.
//!
//! This crate provides:
//! - Named strength profiles (`PROFILE_V1`..`PROFILE_V3`) mapping to fixed
//!   Argon2id cost parameters
//! - Key derivation with a fresh random salt per block
//! - AES-256-GCM sealing with a random nonce per operation
//! - [`Envelope`], the (ciphertext, nonce, salt, profile) record that travels
//!   with every block
//!
//! This is a pure crate with no I/O.
//!
//! ## Security Model
//!
//! - Only the profile tag travels with a block; decryption re-derives the key
//!   with that profile's exact parameters
//! - Keys are zeroized on drop and redacted in `Debug` output
//! - A wrong password and tampered data both surface as
//!   [`CryptoError::AuthenticationFailed`], never as garbage plaintext
//!
//! ```
//! use lockbox_crypto::{Envelope, Profile};
//!
//! let envelope = Envelope::seal(b"hunter2", Profile::V1, b"pin: 0000").unwrap();
//! assert_eq!(envelope.open(b"hunter2").unwrap(), b"pin: 0000");
//! assert!(envelope.open(b"hunter3").is_err());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod cipher;
mod envelope;
mod error;
mod key;
mod profile;

pub use cipher::{open, seal, Cipher, NONCE_SIZE, TAG_SIZE};
pub use envelope::Envelope;
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_salt, EncryptionKey, KEY_SIZE, SALT_SIZE};
pub use profile::{KdfParams, Profile};
