//! Request dispatch.

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::registry::SubscriptionRegistry;
use crate::service::StorageService;
use crate::stream::{StreamEnd, StreamingSyncServer};
use lockbox_protocol::{Call, ClientId, Request, Response, StatusCode, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// How long a finished stream waits to hand over its terminal frame.
const TERMINAL_GRACE: Duration = Duration::from_secs(1);

/// What the server sends back for one request.
#[derive(Debug)]
pub enum Reply {
    /// A single response frame.
    Unary(Response),
    /// Frames produced by a running stream. The last one is terminal.
    Stream(mpsc::Receiver<Response>),
}

/// Shared state for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Account store and token verifier.
    pub auth: Arc<dyn Authenticator>,
    /// Subscription registry.
    pub registry: Arc<SubscriptionRegistry>,
    /// Block operations.
    pub service: Arc<StorageService>,
    /// Snapshot streams.
    pub streams: Arc<StreamingSyncServer>,
    /// Fired when the server shuts down.
    pub shutdown: CancellationToken,
    /// Tracks running stream tasks.
    pub tracker: TaskTracker,
}

/// Handler for client requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Authenticates and dispatches a request.
    ///
    /// `cancel` fires when the caller goes away; only streams observe it.
    pub async fn handle(&self, request: Request, cancel: CancellationToken) -> Reply {
        if self.context.shutdown.is_cancelled() {
            return Reply::Unary(Response::error(
                StatusCode::Unavailable,
                "server shutting down",
            ));
        }

        let name = request.call.name();
        let user_id = if request.call.requires_auth() {
            match self.resolve(request.token.as_deref()) {
                Ok(user_id) => Some(user_id),
                Err(e) => {
                    debug!(call = name, error = %e, "rejected unauthenticated call");
                    return Reply::Unary(e.to_response());
                }
            }
        } else {
            None
        };

        match (request.call, user_id) {
            (Call::Stream { client_id }, Some(user_id)) => {
                Reply::Stream(self.spawn_stream(user_id, client_id, cancel))
            }
            (call, user_id) => {
                let response = self.unary(call, user_id.unwrap_or_default()).await;
                Reply::Unary(response.unwrap_or_else(|e| {
                    if e.is_server_error() {
                        warn!(call = name, error = %e, "call failed");
                    }
                    e.to_response()
                }))
            }
        }
    }

    fn resolve(&self, token: Option<&str>) -> ServerResult<UserId> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServerError::Unauthenticated("missing authorization token".into()))?;
        self.context.auth.verify(token)
    }

    async fn unary(&self, call: Call, user_id: UserId) -> ServerResult<Response> {
        let ctx = &self.context;
        match call {
            Call::Register { username, password } => {
                let auth = Arc::clone(&ctx.auth);
                let token = hashing(move || auth.register(&username, &password)).await?;
                Ok(Response::Token { token })
            }
            Call::Login { username, password } => {
                let auth = Arc::clone(&ctx.auth);
                let token = hashing(move || auth.authenticate(&username, &password)).await?;
                Ok(Response::Token { token })
            }
            Call::Ping => Ok(Response::Pong),
            Call::WriteBlock { block } => Ok(Response::Written {
                id: ctx.service.save_block(user_id, block)?,
            }),
            Call::ListBlocks { .. } => Ok(Response::Snapshot {
                blocks: ctx.service.list_blocks(user_id)?,
            }),
            Call::ListTypes => Ok(Response::Types {
                types: ctx.service.list_types()?,
            }),
            Call::Subscribe { client_id } => {
                ctx.registry.subscribe(user_id, client_id);
                Ok(Response::Ok)
            }
            Call::Unsubscribe { client_id } => {
                ctx.registry.unsubscribe(user_id, client_id);
                Ok(Response::Ok)
            }
            Call::Stream { .. } => Err(ServerError::InvalidRequest(
                "stream is not a unary call".into(),
            )),
        }
    }

    fn spawn_stream(
        &self,
        user_id: UserId,
        client_id: ClientId,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Response> {
        let (tx, rx) = mpsc::channel(self.context.config.stream_buffer);
        let context = Arc::clone(&self.context);

        self.context.tracker.spawn(async move {
            // Shutdown cancels the child; the watcher forwards the caller leaving.
            let stop = context.shutdown.child_token();
            let watcher = tokio::spawn({
                let stop = stop.clone();
                async move {
                    cancel.cancelled().await;
                    stop.cancel();
                }
            });

            let result = context
                .streams
                .serve(user_id, client_id, tx.clone(), stop)
                .await;
            watcher.abort();

            let terminal = match result {
                Ok(outcome) if outcome.end == StreamEnd::ClientClosed => {
                    if context.shutdown.is_cancelled() {
                        Some(Response::error(
                            StatusCode::Unavailable,
                            "server shutting down",
                        ))
                    } else {
                        None
                    }
                }
                Ok(outcome) => Some(outcome.end.terminal_frame()),
                Err(e) => Some(e.to_response()),
            };

            if let Some(frame) = terminal {
                // The caller may already be gone or may have stopped reading.
                if tokio::time::timeout(TERMINAL_GRACE, tx.send(frame)).await.is_err() {
                    debug!(user_id, %client_id, "terminal frame dropped");
                }
            }
        });

        rx
    }
}

/// Runs password hashing on the blocking pool.
async fn hashing<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("hashing task failed: {}", e)))?
}
