//! # Lockbox Sync Server
//!
//! Stores encrypted blocks and pushes live snapshots to connected clients.
//!
//! This crate provides:
//! - [`SubscriptionRegistry`]: per-user, per-client coalescing notification
//!   channels
//! - [`StreamingSyncServer`]: snapshot streams bounded by an absolute deadline
//! - [`StorageService`] over a pluggable [`BlockStore`]
//! - Authentication ([`Authenticator`], HMAC-SHA256 tokens)
//! - A TCP listener speaking length-delimited CBOR frames
//!
//! # Write path
//!
//! 1. A client writes a block.
//! 2. The service stores it and re-reads the user's blocks.
//! 3. The registry offers that list to every subscribed client of the user.
//! 4. Each woken stream re-reads storage and sends a full snapshot.
//!
//! ```rust,ignore
//! use lockbox_server::{ServerConfig, VaultServer};
//! use std::sync::Arc;
//!
//! let config = ServerConfig::default().with_auth_secret(secret);
//! let server = Arc::new(VaultServer::new(config));
//! lockbox_server::run(Arc::clone(&server)).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod net;
mod registry;
mod server;
mod service;
mod storage;
mod stream;

pub use auth::{Authenticator, MemoryAuthenticator, TokenSigner};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, Reply, RequestHandler};
pub use net::{run, serve};
pub use registry::{
    AttachError, Attachment, Delivery, DeliveryHandle, NotifyReport, Snapshot,
    SubscriptionRegistry,
};
pub use server::VaultServer;
pub use service::StorageService;
pub use storage::{BlockStore, MemoryBlockStore, StoreError};
pub use stream::{StreamEnd, StreamOutcome, StreamingSyncServer};
