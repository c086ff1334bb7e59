//! Session state.

use crate::error::{ClientError, ClientResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use lockbox_protocol::{ClientId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-process session data.
///
/// The client id is generated once and persisted with the rest of the
/// state; the online flag is runtime-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientState {
    /// Bearer token from the last register or login.
    pub token: Option<String>,
    /// User id resolved from the token.
    pub user_id: Option<UserId>,
    /// Stable id of this client installation.
    pub client_id: ClientId,
    /// Whether the server was reachable at the last check.
    #[serde(skip)]
    pub online: bool,
}

impl ClientState {
    /// Creates an anonymous state with a fresh client id.
    pub fn new() -> Self {
        Self {
            token: None,
            user_id: None,
            client_id: Uuid::new_v4(),
            online: false,
        }
    }

    /// Stores a token and the user id it carries.
    pub fn set_token(&mut self, token: String) -> ClientResult<()> {
        self.user_id = Some(token_user_id(&token)?);
        self.token = Some(token);
        Ok(())
    }

    /// Returns the token, or [`ClientError::NotLoggedIn`].
    pub fn require_token(&self) -> ClientResult<&str> {
        self.token.as_deref().ok_or(ClientError::NotLoggedIn)
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the user id from a server token.
///
/// The signature is not checked; only the server can do that.
pub fn token_user_id(token: &str) -> ClientResult<UserId> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| ClientError::Unauthenticated(format!("malformed token: {}", e)))?;
    let bytes: [u8; 8] = raw
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| ClientError::Unauthenticated("token too short".into()))?;
    Ok(UserId::from_be_bytes(bytes))
}

/// Connectivity as last observed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// No check has completed yet.
    Unknown,
    /// The last check succeeded.
    Online,
    /// The last check failed.
    Offline,
}

impl Connectivity {
    /// Returns true if the server was reachable at the last check.
    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }

    /// Returns the state after a check, and whether it changed.
    pub fn observe(self, reachable: bool) -> (Connectivity, bool) {
        let next = if reachable {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        (next, next != self)
    }
}

/// Counters for an engine's lifetime.
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    /// Reconciliation passes run.
    pub reconcile_passes: u64,
    /// Queued blocks written to the server.
    pub blocks_reconciled: u64,
    /// Snapshots received from the stream.
    pub snapshots_received: u64,
    /// Streams opened.
    pub streams_opened: u64,
    /// Last error message.
    pub last_error: Option<String>,
}
