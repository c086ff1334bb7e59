//! Account registration, login and bearer tokens.
//!
//! Passwords are stored as Argon2 PHC strings. Tokens are HMAC-SHA256
//! signed and carry an issue timestamp for expiration checking.
//!
//! ## Token Format
//!
//! - 8 bytes: user_id (big-endian)
//! - 8 bytes: timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature
//!
//! Total: 48 bytes, base64url-encoded (no padding) for transport.

use crate::error::{ServerError, ServerResult};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use lockbox_protocol::UserId;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

const PAYLOAD_LEN: usize = 16;
const TOKEN_LEN: usize = PAYLOAD_LEN + 32;

/// Resolves callers to users.
///
/// Register and login are the only calls that run without a token; every
/// other call goes through [`verify`](Authenticator::verify) first.
pub trait Authenticator: Send + Sync {
    /// Creates an account and returns a token for it.
    fn register(&self, username: &str, password: &str) -> ServerResult<String>;

    /// Checks credentials and returns a fresh token.
    fn authenticate(&self, username: &str, password: &str) -> ServerResult<String>;

    /// Resolves a token to its user.
    fn verify(&self, token: &str) -> ServerResult<UserId>;
}

/// Issues and checks signed tokens.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    expiry: Duration,
}

impl TokenSigner {
    /// Creates a signer.
    pub fn new(secret: Vec<u8>, expiry: Duration) -> Self {
        Self { secret, expiry }
    }

    /// Creates a token for `user_id`, issued now.
    pub fn create_token(&self, user_id: UserId) -> ServerResult<String> {
        self.create_token_at(user_id, now_millis())
    }

    fn create_token_at(&self, user_id: UserId, issued_at: u64) -> ServerResult<String> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(&user_id.to_be_bytes());
        token.extend_from_slice(&issued_at.to_be_bytes());

        let signature = self.sign(&token)?;
        token.extend_from_slice(&signature);

        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Validates a token and returns its user.
    pub fn verify(&self, token: &str) -> ServerResult<UserId> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| ServerError::Unauthenticated("malformed token".into()))?;
        if raw.len() != TOKEN_LEN {
            return Err(ServerError::Unauthenticated("invalid token length".into()));
        }

        let (payload, signature) = raw.split_at(PAYLOAD_LEN);
        let mut mac = self.mac()?;
        mac.update(payload);
        mac.verify_slice(signature)
            .map_err(|_| ServerError::Unauthenticated("invalid signature".into()))?;

        let (user_bytes, issued_bytes) = payload.split_at(8);
        let user_id = UserId::from_be_bytes(fixed(user_bytes)?);
        let issued_at = u64::from_be_bytes(fixed(issued_bytes)?);

        let expiry_millis = self.expiry.as_millis() as u64;
        if now_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(ServerError::Unauthenticated("token expired".into()));
        }

        Ok(user_id)
    }

    fn mac(&self) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {}", e)))
    }

    fn sign(&self, data: &[u8]) -> ServerResult<[u8; 32]> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }
}

fn fixed(bytes: &[u8]) -> ServerResult<[u8; 8]> {
    bytes
        .try_into()
        .map_err(|_| ServerError::Unauthenticated("invalid token layout".into()))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone)]
struct UserRecord {
    id: UserId,
    password_hash: String,
}

#[derive(Default)]
struct Accounts {
    by_name: HashMap<String, UserRecord>,
    last_id: UserId,
}

/// In-memory account store with Argon2 password hashes.
pub struct MemoryAuthenticator {
    signer: TokenSigner,
    accounts: RwLock<Accounts>,
}

impl MemoryAuthenticator {
    /// Creates an authenticator with no accounts.
    pub fn new(signer: TokenSigner) -> Self {
        Self {
            signer,
            accounts: RwLock::new(Accounts::default()),
        }
    }

    /// Returns the number of registered accounts.
    pub fn user_count(&self) -> usize {
        self.accounts.read().by_name.len()
    }
}

fn check_credentials(username: &str, password: &str) -> ServerResult<()> {
    if username.trim().is_empty() {
        return Err(ServerError::InvalidRequest("username must not be empty".into()));
    }
    if password.is_empty() {
        return Err(ServerError::InvalidRequest("password must not be empty".into()));
    }
    Ok(())
}

impl Authenticator for MemoryAuthenticator {
    fn register(&self, username: &str, password: &str) -> ServerResult<String> {
        check_credentials(username, password)?;
        if self.accounts.read().by_name.contains_key(username) {
            return Err(ServerError::AlreadyExists("user already exists".into()));
        }

        // Hash outside the lock.
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| ServerError::Internal(format!("password hash: {}", e)))?
            .to_string();

        let user_id = {
            let mut accounts = self.accounts.write();
            if accounts.by_name.contains_key(username) {
                return Err(ServerError::AlreadyExists("user already exists".into()));
            }
            accounts.last_id += 1;
            let id = accounts.last_id;
            accounts.by_name.insert(
                username.to_string(),
                UserRecord { id, password_hash },
            );
            id
        };

        info!(user_id, username, "user registered");
        self.signer.create_token(user_id)
    }

    fn authenticate(&self, username: &str, password: &str) -> ServerResult<String> {
        let record = self
            .accounts
            .read()
            .by_name
            .get(username)
            .cloned()
            .ok_or_else(|| ServerError::NotFound("user does not exist".into()))?;

        let parsed = PasswordHash::new(&record.password_hash)
            .map_err(|e| ServerError::Internal(format!("stored hash: {}", e)))?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            warn!(username, "rejected login");
            return Err(ServerError::Unauthenticated("invalid credentials".into()));
        }

        self.signer.create_token(record.id)
    }

    fn verify(&self, token: &str) -> ServerResult<UserId> {
        self.signer.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(
            b"test-secret-key-32-bytes-long!!".to_vec(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn create_and_verify_token() {
        let signer = signer();
        let token = signer.create_token(42).unwrap();
        assert_eq!(signer.verify(&token).unwrap(), 42);
    }

    #[test]
    fn reject_tampered_token() {
        let signer = signer();
        let token = signer.create_token(42).unwrap();

        let mut raw = URL_SAFE_NO_PAD.decode(&token).unwrap();
        raw[30] ^= 0xFF; // Flip a bit in the signature
        let tampered = URL_SAFE_NO_PAD.encode(raw);

        assert!(matches!(
            signer.verify(&tampered),
            Err(ServerError::Unauthenticated(_))
        ));
    }

    #[test]
    fn reject_forged_user() {
        let signer = signer();
        let token = signer.create_token(1).unwrap();

        let mut raw = URL_SAFE_NO_PAD.decode(&token).unwrap();
        raw[7] = 2;
        assert!(signer.verify(&URL_SAFE_NO_PAD.encode(raw)).is_err());
    }

    #[test]
    fn reject_other_secret() {
        let token = signer().create_token(7).unwrap();
        let other = TokenSigner::new(b"another-secret".to_vec(), Duration::from_secs(60));
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let signer = signer();
        let token = signer.create_token_at(7, now_millis() - 120_000).unwrap();
        assert!(matches!(
            signer.verify(&token),
            Err(ServerError::Unauthenticated(msg)) if msg.contains("expired")
        ));
    }

    #[test]
    fn reject_garbage() {
        let signer = signer();
        assert!(signer.verify("").is_err());
        assert!(signer.verify("not base64 at all!").is_err());
        assert!(signer.verify(&URL_SAFE_NO_PAD.encode([0u8; 10])).is_err());
    }

    #[test]
    fn register_then_login() {
        let auth = MemoryAuthenticator::new(signer());

        let token = auth.register("alice", "pw").unwrap();
        let user_id = auth.verify(&token).unwrap();

        let token = auth.authenticate("alice", "pw").unwrap();
        assert_eq!(auth.verify(&token).unwrap(), user_id);
        assert_eq!(auth.user_count(), 1);
    }

    #[test]
    fn users_get_distinct_ids() {
        let auth = MemoryAuthenticator::new(signer());
        let a = auth.verify(&auth.register("alice", "pw").unwrap()).unwrap();
        let b = auth.verify(&auth.register("bob", "pw").unwrap()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn duplicate_register_rejected() {
        let auth = MemoryAuthenticator::new(signer());
        auth.register("alice", "pw").unwrap();
        assert!(matches!(
            auth.register("alice", "other"),
            Err(ServerError::AlreadyExists(_))
        ));
    }

    #[test]
    fn login_failures() {
        let auth = MemoryAuthenticator::new(signer());
        auth.register("alice", "pw").unwrap();

        assert!(matches!(
            auth.authenticate("alice", "wrong"),
            Err(ServerError::Unauthenticated(_))
        ));
        assert!(matches!(
            auth.authenticate("bob", "pw"),
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn empty_credentials_rejected() {
        let auth = MemoryAuthenticator::new(signer());
        assert!(matches!(
            auth.register("", "pw"),
            Err(ServerError::InvalidRequest(_))
        ));
        assert!(matches!(
            auth.register("alice", ""),
            Err(ServerError::InvalidRequest(_))
        ));
    }
}
