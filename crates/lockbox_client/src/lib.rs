//! # Lockbox Client
//!
//! Offline-first client for the Lockbox vault.
//!
//! This crate provides:
//! - [`OfflineStore`]: durable local copy of synced and queued blocks
//! - [`ClientSyncEngine`]: connectivity polling, reconciliation and the
//!   live snapshot stream
//! - [`VaultTransport`] with a frame-level implementation ([`RpcTransport`])
//!   over TCP or an in-process loopback
//!
//! ## Online and offline
//!
//! 1. Every interval the engine pings the server.
//! 2. Going online: queued blocks are written concurrently, successes move
//!    to the synced list, then the engine subscribes and opens one stream.
//! 3. Each snapshot replaces the synced list.
//! 4. Going offline: the stream is dropped and saves are queued.
//!
//! ## Key Invariants
//!
//! - A block is either synced or queued, never both
//! - At most one stream per client process
//! - Decryption never modifies a stored block

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod engine;
mod error;
mod offline;
mod rpc;
mod state;
mod transport;

pub use config::ClientConfig;
pub use engine::{ClientEvent, ClientSyncEngine, SaveOutcome};
pub use error::{ClientError, ClientResult};
pub use offline::{OfflineStore, StoreData};
pub use rpc::{LoopbackChannel, LoopbackReply, LoopbackServer, RpcChannel, RpcTransport, TcpChannel};
pub use state::{token_user_id, ClientState, ClientStats, Connectivity};
pub use transport::{MockTransport, SnapshotStream, VaultTransport};
