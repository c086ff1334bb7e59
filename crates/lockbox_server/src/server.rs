//! Main sync server.

use crate::auth::{Authenticator, MemoryAuthenticator, TokenSigner};
use crate::config::ServerConfig;
use crate::handler::{HandlerContext, Reply, RequestHandler};
use crate::registry::SubscriptionRegistry;
use crate::service::StorageService;
use crate::storage::{BlockStore, MemoryBlockStore};
use crate::stream::StreamingSyncServer;
use lockbox_protocol::{Request, Response, StatusCode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// The sync server.
///
/// Owns the subscription registry, storage service and stream runner, and
/// dispatches decoded requests to them. Transport is handled elsewhere:
/// [`serve`](crate::serve) for TCP, or call [`handle`](Self::handle)
/// directly for in-process use.
///
/// # Example
///
/// ```
/// use lockbox_server::{ServerConfig, VaultServer};
///
/// let server = VaultServer::new(ServerConfig::default());
/// assert_eq!(server.registry().len(), 0);
/// ```
pub struct VaultServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl VaultServer {
    /// Creates a server with in-memory accounts and block storage.
    pub fn new(config: ServerConfig) -> Self {
        let auth = Arc::new(MemoryAuthenticator::new(TokenSigner::new(
            config.auth_secret.clone(),
            config.token_expiry,
        )));
        Self::with_parts(config, auth, Arc::new(MemoryBlockStore::new()))
    }

    /// Creates a server over existing collaborators.
    pub fn with_parts(
        config: ServerConfig,
        auth: Arc<dyn Authenticator>,
        store: Arc<dyn BlockStore>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::with_capacity(
            config.notification_capacity,
        ));
        let service = Arc::new(StorageService::new(store, Arc::clone(&registry)));
        let streams = Arc::new(StreamingSyncServer::new(
            Arc::clone(&registry),
            Arc::clone(&service),
            config.stream_deadline,
        ));

        let context = Arc::new(HandlerContext {
            config,
            auth,
            registry,
            service,
            streams,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles a decoded request.
    ///
    /// Must run inside a Tokio runtime: stream calls spawn their loop.
    pub async fn handle(&self, request: Request, cancel: CancellationToken) -> Reply {
        debug!(call = ?request.call, "request");
        self.handler.handle(request, cancel).await
    }

    /// Decodes a request frame and handles it. An undecodable frame gets an
    /// `InvalidArgument` reply.
    pub async fn handle_frame(&self, frame: &[u8], cancel: CancellationToken) -> Reply {
        match Request::decode(frame) {
            Ok(request) => self.handle(request, cancel).await,
            Err(e) => Reply::Unary(Response::error(StatusCode::InvalidArgument, e.to_string())),
        }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the subscription registry.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.context.registry
    }

    /// Returns the storage service.
    pub fn service(&self) -> &Arc<StorageService> {
        &self.context.service
    }

    /// Returns a token that fires when the server shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.context.shutdown.clone()
    }

    /// Returns the number of running streams.
    pub fn active_streams(&self) -> usize {
        self.context.tracker.len()
    }

    /// Stops accepting calls, ends every stream and waits for them to finish.
    pub async fn shutdown(&self) {
        info!(streams = self.active_streams(), "shutting down");
        self.context.shutdown.cancel();
        self.context.tracker.close();
        self.context.tracker.wait().await;
    }
}
