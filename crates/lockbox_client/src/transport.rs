//! Transport layer abstraction for vault calls.

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use lockbox_protocol::{Block, BlockId, BlockType, ClientId, Response};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// A transport carries vault calls to the server.
///
/// Implementations must be cheap to call concurrently; reconciliation
/// issues one `write_block` per queued block at once.
#[async_trait]
pub trait VaultTransport: Send + Sync {
    /// Creates an account and returns its token.
    async fn register(&self, username: &str, password: &str) -> ClientResult<String>;

    /// Logs in and returns a token.
    async fn login(&self, username: &str, password: &str) -> ClientResult<String>;

    /// Authenticated no-op round trip.
    async fn ping(&self, token: &str) -> ClientResult<()>;

    /// Stores a block and returns its id.
    async fn write_block(&self, token: &str, block: Block) -> ClientResult<BlockId>;

    /// Lists the caller's blocks once.
    async fn list_blocks(&self, token: &str, client_id: ClientId) -> ClientResult<Vec<Block>>;

    /// Fetches the type catalog.
    async fn list_types(&self, token: &str) -> ClientResult<Vec<BlockType>>;

    /// Registers this client for notifications.
    async fn subscribe(&self, token: &str, client_id: ClientId) -> ClientResult<()>;

    /// Removes this client's notification channel.
    async fn unsubscribe(&self, token: &str, client_id: ClientId) -> ClientResult<()>;

    /// Opens the snapshot stream. The client must be subscribed.
    async fn open_stream(&self, token: &str, client_id: ClientId) -> ClientResult<SnapshotStream>;
}

/// Receiving side of a snapshot stream.
///
/// Yields snapshots until the server's terminal frame: `None` after a clean
/// end, one `Err` for an error frame. Dropping it closes the call.
#[derive(Debug)]
pub struct SnapshotStream {
    frames: mpsc::Receiver<ClientResult<Vec<u8>>>,
    finished: bool,
}

impl SnapshotStream {
    /// Wraps a receiver of raw response frames.
    pub fn new(frames: mpsc::Receiver<ClientResult<Vec<u8>>>) -> Self {
        Self {
            frames,
            finished: false,
        }
    }

    /// Returns the next snapshot.
    pub async fn next(&mut self) -> Option<ClientResult<Vec<Block>>> {
        if self.finished {
            return None;
        }

        let item = match self.frames.recv().await {
            Some(Ok(frame)) => Response::decode(&frame).map_err(ClientError::from),
            Some(Err(e)) => Err(e),
            None => Err(ClientError::transport_retryable(
                "stream closed without a terminal frame",
            )),
        };

        match item {
            Ok(Response::Snapshot { blocks }) => Some(Ok(blocks)),
            Ok(Response::End) => {
                self.finished = true;
                None
            }
            Ok(Response::Error { code, message }) => {
                self.finished = true;
                Some(Err(ClientError::from_status(code, message)))
            }
            Ok(other) => {
                self.finished = true;
                Some(Err(other.unexpected("snapshot").into()))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// A scriptable transport for testing.
///
/// Keeps blocks in memory, can be switched offline, and counts calls.
#[derive(Debug, Default)]
pub struct MockTransport {
    offline: AtomicBool,
    token_rejected: AtomicBool,
    fail_writes: Mutex<Vec<String>>,
    blocks: Mutex<Vec<Block>>,
    stream: Mutex<Option<mpsc::Sender<ClientResult<Vec<u8>>>>>,
    subscribed: AtomicBool,
    writes: AtomicUsize,
    pings: AtomicUsize,
    streams_opened: AtomicUsize,
}

impl MockTransport {
    /// Creates a connected mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether calls succeed.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
        if !online {
            self.stream.lock().take();
        }
    }

    /// Makes pings fail as if the token had expired.
    pub fn set_token_rejected(&self, rejected: bool) {
        self.token_rejected.store(rejected, Ordering::SeqCst);
    }

    /// Makes writes of blocks with this title fail.
    pub fn fail_writes_titled(&self, title: impl Into<String>) {
        self.fail_writes.lock().push(title.into());
    }

    /// Pushes a snapshot to the open stream. Returns false if none is open.
    pub fn push_snapshot(&self, blocks: Vec<Block>) -> bool {
        self.push_frame(Response::Snapshot { blocks })
    }

    /// Sends a raw frame on the open stream.
    pub fn push_frame(&self, frame: Response) -> bool {
        let Some(tx) = self.stream.lock().clone() else {
            return false;
        };
        match frame.encode() {
            Ok(bytes) => tx.try_send(Ok(bytes)).is_ok(),
            Err(_) => false,
        }
    }

    /// Returns the blocks written so far.
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.lock().clone()
    }

    /// Returns the number of write calls, failed ones included.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the number of ping calls.
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Returns the number of streams opened.
    pub fn stream_count(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }

    /// Returns true if a subscribe has not been undone.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> ClientResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ClientError::transport_retryable("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VaultTransport for MockTransport {
    async fn register(&self, _username: &str, _password: &str) -> ClientResult<String> {
        self.check_online()?;
        Ok("mock-token".into())
    }

    async fn login(&self, _username: &str, _password: &str) -> ClientResult<String> {
        self.check_online()?;
        Ok("mock-token".into())
    }

    async fn ping(&self, _token: &str) -> ClientResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if self.token_rejected.load(Ordering::SeqCst) {
            return Err(ClientError::Unauthenticated("token expired".into()));
        }
        Ok(())
    }

    async fn write_block(&self, _token: &str, mut block: Block) -> ClientResult<BlockId> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if self.fail_writes.lock().contains(&block.title) {
            return Err(ClientError::Server("write rejected".into()));
        }
        let mut blocks = self.blocks.lock();
        block.id = blocks.len() as BlockId + 1;
        blocks.push(block);
        Ok(blocks.len() as BlockId)
    }

    async fn list_blocks(&self, _token: &str, _client_id: ClientId) -> ClientResult<Vec<Block>> {
        self.check_online()?;
        Ok(self.blocks())
    }

    async fn list_types(&self, _token: &str) -> ClientResult<Vec<BlockType>> {
        self.check_online()?;
        Ok(BlockType::catalog())
    }

    async fn subscribe(&self, _token: &str, _client_id: ClientId) -> ClientResult<()> {
        self.check_online()?;
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unsubscribe(&self, _token: &str, _client_id: ClientId) -> ClientResult<()> {
        self.check_online()?;
        self.subscribed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn open_stream(&self, _token: &str, _client_id: ClientId) -> ClientResult<SnapshotStream> {
        self.check_online()?;
        if !self.is_subscribed() {
            return Err(ClientError::NotFound("no subscription".into()));
        }
        self.streams_opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        let initial = Response::Snapshot {
            blocks: self.blocks(),
        }
        .encode()?;
        let _ = tx.try_send(Ok(initial));
        *self.stream.lock() = Some(tx);
        Ok(SnapshotStream::new(rx))
    }
}
