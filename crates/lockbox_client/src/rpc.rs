//! Frame-level RPC transport.
//!
//! [`RpcTransport`] turns vault calls into CBOR request frames and decodes
//! the replies. The bytes travel over an [`RpcChannel`]: TCP for real use,
//! or a loopback channel that calls an in-process server.

use crate::error::{ClientError, ClientResult};
use crate::transport::{SnapshotStream, VaultTransport};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use lockbox_protocol::{
    frame_codec, Block, BlockId, BlockType, Call, ClientId, Request, Response,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Frames kept in flight per open stream.
const STREAM_BUFFER: usize = 8;

/// Carries encoded frames to a server.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Sends one request frame and returns the single reply frame.
    async fn unary(&self, frame: Vec<u8>) -> ClientResult<Vec<u8>>;

    /// Sends one request frame and returns the reply frames as they arrive.
    /// Dropping the receiver closes the call.
    async fn streaming(&self, frame: Vec<u8>)
        -> ClientResult<mpsc::Receiver<ClientResult<Vec<u8>>>>;
}

/// [`VaultTransport`] over an [`RpcChannel`].
pub struct RpcTransport<C: RpcChannel> {
    channel: C,
}

impl<C: RpcChannel> RpcTransport<C> {
    /// Creates a transport over `channel`.
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Returns the underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    async fn call(&self, request: Request) -> ClientResult<Response> {
        let call = request.call.name();
        let frame = self.channel.unary(request.encode()?).await?;
        match Response::decode(&frame)? {
            Response::Error { code, message } => {
                debug!(call, %code, message = %message, "call failed");
                Err(ClientError::from_status(code, message))
            }
            response => Ok(response),
        }
    }

    async fn call_authorized(&self, token: &str, call: Call) -> ClientResult<Response> {
        self.call(Request::authorized(token, call)).await
    }

    async fn expect_ok(&self, token: &str, call: Call) -> ClientResult<()> {
        match self.call_authorized(token, call).await? {
            Response::Ok => Ok(()),
            other => Err(other.unexpected("ok").into()),
        }
    }

    async fn expect_token(&self, request: Request) -> ClientResult<String> {
        match self.call(request).await? {
            Response::Token { token } => Ok(token),
            other => Err(other.unexpected("token").into()),
        }
    }
}

#[async_trait]
impl<C: RpcChannel> VaultTransport for RpcTransport<C> {
    async fn register(&self, username: &str, password: &str) -> ClientResult<String> {
        self.expect_token(Request::anonymous(Call::Register {
            username: username.to_string(),
            password: password.to_string(),
        }))
        .await
    }

    async fn login(&self, username: &str, password: &str) -> ClientResult<String> {
        self.expect_token(Request::anonymous(Call::Login {
            username: username.to_string(),
            password: password.to_string(),
        }))
        .await
    }

    async fn ping(&self, token: &str) -> ClientResult<()> {
        match self.call_authorized(token, Call::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(other.unexpected("pong").into()),
        }
    }

    async fn write_block(&self, token: &str, block: Block) -> ClientResult<BlockId> {
        match self.call_authorized(token, Call::WriteBlock { block }).await? {
            Response::Written { id } => Ok(id),
            other => Err(other.unexpected("written").into()),
        }
    }

    async fn list_blocks(&self, token: &str, client_id: ClientId) -> ClientResult<Vec<Block>> {
        match self
            .call_authorized(token, Call::ListBlocks { client_id })
            .await?
        {
            Response::Snapshot { blocks } => Ok(blocks),
            other => Err(other.unexpected("snapshot").into()),
        }
    }

    async fn list_types(&self, token: &str) -> ClientResult<Vec<BlockType>> {
        match self.call_authorized(token, Call::ListTypes).await? {
            Response::Types { types } => Ok(types),
            other => Err(other.unexpected("types").into()),
        }
    }

    async fn subscribe(&self, token: &str, client_id: ClientId) -> ClientResult<()> {
        self.expect_ok(token, Call::Subscribe { client_id }).await
    }

    async fn unsubscribe(&self, token: &str, client_id: ClientId) -> ClientResult<()> {
        self.expect_ok(token, Call::Unsubscribe { client_id }).await
    }

    async fn open_stream(&self, token: &str, client_id: ClientId) -> ClientResult<SnapshotStream> {
        let request = Request::authorized(token, Call::Stream { client_id });
        let frames = self.channel.streaming(request.encode()?).await?;
        Ok(SnapshotStream::new(frames))
    }
}

/// [`RpcChannel`] over TCP with length-delimited frames, one connection
/// per call.
#[derive(Debug, Clone)]
pub struct TcpChannel {
    addr: String,
    connect_timeout: Duration,
}

impl TcpChannel {
    /// Creates a channel to `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }

    /// Returns the server address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> ClientResult<Framed<TcpStream, LengthDelimitedCodec>> {
        let socket = timeout(self.connect_timeout, TcpStream::connect(self.addr.as_str()))
            .await
            .map_err(|_| ClientError::transport_retryable(format!("connect to {} timed out", self.addr)))??;
        socket.set_nodelay(true)?;
        Ok(Framed::new(socket, frame_codec()))
    }
}

#[async_trait]
impl RpcChannel for TcpChannel {
    async fn unary(&self, frame: Vec<u8>) -> ClientResult<Vec<u8>> {
        let mut framed = self.connect().await?;
        framed.send(Bytes::from(frame)).await?;
        match framed.next().await {
            Some(reply) => Ok(reply?.to_vec()),
            None => Err(ClientError::transport_retryable(
                "connection closed before reply",
            )),
        }
    }

    async fn streaming(
        &self,
        frame: Vec<u8>,
    ) -> ClientResult<mpsc::Receiver<ClientResult<Vec<u8>>>> {
        let mut framed = self.connect().await?;
        framed.send(Bytes::from(frame)).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Dropping the connection tells the server to stop.
                    _ = tx.closed() => break,
                    frame = framed.next() => match frame {
                        Some(Ok(bytes)) => {
                            if tx.send(Ok(bytes.to_vec())).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            let _ = tx.send(Err(e.into())).await;
                            break;
                        }
                        None => break,
                    },
                }
            }
        });
        Ok(rx)
    }
}

/// Reply from a [`LoopbackServer`].
#[derive(Debug)]
pub enum LoopbackReply {
    /// A single encoded response.
    Unary(Vec<u8>),
    /// Encoded response frames of a stream.
    Stream(mpsc::Receiver<Vec<u8>>),
}

/// An in-process server reachable through a [`LoopbackChannel`].
#[async_trait]
pub trait LoopbackServer: Send + Sync {
    /// Handles one request frame. `cancel` fires when the caller drops the
    /// stream.
    async fn dispatch(&self, frame: Vec<u8>, cancel: CancellationToken) -> LoopbackReply;
}

/// [`RpcChannel`] that calls a server in the same process.
pub struct LoopbackChannel<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackChannel<S> {
    /// Creates a channel to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> RpcChannel for LoopbackChannel<S> {
    async fn unary(&self, frame: Vec<u8>) -> ClientResult<Vec<u8>> {
        match self.server.dispatch(frame, CancellationToken::new()).await {
            LoopbackReply::Unary(reply) => Ok(reply),
            LoopbackReply::Stream(_) => Err(ClientError::transport_fatal(
                "stream reply to a unary call",
            )),
        }
    }

    async fn streaming(
        &self,
        frame: Vec<u8>,
    ) -> ClientResult<mpsc::Receiver<ClientResult<Vec<u8>>>> {
        let cancel = CancellationToken::new();
        let mut frames = match self.server.dispatch(frame, cancel.clone()).await {
            LoopbackReply::Stream(frames) => frames,
            LoopbackReply::Unary(reply) => {
                // Rejected before the stream started.
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.try_send(Ok(reply));
                return Ok(rx);
            }
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            let _cancel_on_exit = cancel.drop_guard();
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    frame = frames.recv() => match frame {
                        Some(bytes) => {
                            if tx.send(Ok(bytes)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_protocol::StatusCode;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Answers every unary call with a fixed response and records requests.
    struct FixedServer {
        reply: Response,
        seen: Arc<Mutex<Vec<Request>>>,
        stream_cancelled: CancellationToken,
    }

    impl FixedServer {
        fn new(reply: Response) -> Self {
            Self {
                reply,
                seen: Arc::new(Mutex::new(Vec::new())),
                stream_cancelled: CancellationToken::new(),
            }
        }
    }

    #[async_trait]
    impl LoopbackServer for FixedServer {
        async fn dispatch(&self, frame: Vec<u8>, cancel: CancellationToken) -> LoopbackReply {
            let request = Request::decode(&frame).unwrap();
            let streaming = request.call.is_streaming();
            self.seen.lock().push(request);

            if !streaming {
                return LoopbackReply::Unary(self.reply.encode().unwrap());
            }

            let (tx, rx) = mpsc::channel(4);
            let snapshot = Response::Snapshot { blocks: vec![] }.encode().unwrap();
            tx.try_send(snapshot).unwrap();
            let observed = self.stream_cancelled.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                observed.cancel();
                drop(tx);
            });
            LoopbackReply::Stream(rx)
        }
    }

    #[tokio::test]
    async fn unary_calls_carry_token() {
        let transport = RpcTransport::new(LoopbackChannel::new(FixedServer::new(Response::Pong)));
        transport.ping("secret").await.unwrap();

        let seen = transport.channel().server().seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].token.as_deref(), Some("secret"));
        assert_eq!(seen[0].call, Call::Ping);
    }

    #[tokio::test]
    async fn error_frames_become_errors() {
        let server = FixedServer::new(Response::error(StatusCode::Unauthenticated, "bad token"));
        let transport = RpcTransport::new(LoopbackChannel::new(server));
        assert!(matches!(
            transport.ping("t").await,
            Err(ClientError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn mismatched_reply_is_protocol_error() {
        let transport = RpcTransport::new(LoopbackChannel::new(FixedServer::new(Response::Ok)));
        assert!(matches!(
            transport.ping("t").await,
            Err(ClientError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn dropping_stream_cancels_server_side() {
        let transport = RpcTransport::new(LoopbackChannel::new(FixedServer::new(Response::Ok)));
        let mut stream = transport.open_stream("t", Uuid::new_v4()).await.unwrap();
        assert!(stream.next().await.unwrap().unwrap().is_empty());

        let observed = transport.channel().server().stream_cancelled.clone();
        drop(stream);
        tokio::time::timeout(Duration::from_secs(5), observed.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tcp_channel_reports_refused_connection() {
        // Port 1 on localhost is almost never listening.
        let channel = TcpChannel::new("127.0.0.1:1", Duration::from_millis(500));
        let err = channel.unary(vec![0]).await.unwrap_err();
        assert!(err.is_transient());
    }
}
