//! TCP transport.
//!
//! One call per connection: the client writes a single request frame, the
//! server answers with one frame (unary) or a sequence of frames ending in a
//! terminal one (stream). A stream's connection closing cancels the stream.

use crate::error::ServerResult;
use crate::handler::Reply;
use crate::server::VaultServer;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use lockbox_protocol::frame_codec;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Binds the configured address and serves until shutdown.
pub async fn run(server: Arc<VaultServer>) -> ServerResult<()> {
    let listener = TcpListener::bind(server.config().bind_addr).await?;
    serve(server, listener).await
}

/// Serves connections from `listener` until the server shuts down, then
/// waits for open connections to drain.
pub async fn serve(server: Arc<VaultServer>, listener: TcpListener) -> ServerResult<()> {
    let shutdown = server.shutdown_token();
    let connections = TaskTracker::new();
    info!(addr = %listener.local_addr()?, "listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let server = Arc::clone(&server);
                connections.spawn(async move {
                    if let Err(e) = handle_connection(server, socket, peer).await {
                        debug!(%peer, error = %e, "connection ended with error");
                    }
                });
            }
        }
    }

    connections.close();
    connections.wait().await;
    info!("listener stopped");
    Ok(())
}

async fn handle_connection(
    server: Arc<VaultServer>,
    socket: TcpStream,
    peer: SocketAddr,
) -> ServerResult<()> {
    let (mut sink, mut source) = Framed::new(socket, frame_codec()).split();

    let shutdown = server.shutdown_token();
    let first = tokio::select! {
        _ = shutdown.cancelled() => {
            debug!(%peer, "closing idle connection");
            return Ok(());
        }
        first = source.next() => first,
    };
    let Some(frame) = first.transpose()? else {
        return Ok(());
    };

    let cancel = CancellationToken::new();
    let _cancel_on_exit = cancel.clone().drop_guard();

    match server.handle_frame(&frame, cancel.clone()).await {
        Reply::Unary(response) => {
            sink.send(Bytes::from(response.encode()?)).await?;
        }
        Reply::Stream(mut frames) => loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(response) = frame else { break };
                    let terminal = response.is_terminal();
                    sink.send(Bytes::from(response.encode()?)).await?;
                    if terminal {
                        break;
                    }
                }
                // Nothing is expected after the request; EOF means the peer left.
                _ = source.next() => {
                    debug!(%peer, "stream peer closed");
                    cancel.cancel();
                    break;
                }
            }
        },
    }

    Ok(())
}
