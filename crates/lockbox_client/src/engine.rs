//! Client sync engine.
//!
//! The engine pings the server on a fixed interval. When the check starts
//! succeeding it drains the offline queue, subscribes, and keeps one
//! snapshot stream open; when checks fail it drops the stream and serves
//! reads from the [`OfflineStore`]. Everything it observes is published on
//! a broadcast bus as [`ClientEvent`]s.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::offline::OfflineStore;
use crate::state::{ClientStats, Connectivity};
use crate::transport::{SnapshotStream, VaultTransport};
use futures_util::future::join_all;
use lockbox_crypto::{Envelope, Profile};
use lockbox_protocol::{Block, BlockId, BlockKind, BlockType, ClientId, TypeId};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Something the engine observed.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The server became reachable.
    Online,
    /// The server stopped being reachable.
    Offline,
    /// A snapshot arrived on the stream.
    Snapshot(Vec<Block>),
    /// A background operation failed.
    Error(String),
}

/// Where a saved block ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written to the server with this id.
    Synced(BlockId),
    /// Queued locally until the next reconnect.
    Queued,
}

struct StreamHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Orchestrates online and offline operation for one client process.
///
/// Background loops need shared ownership, so the engine is used through
/// an `Arc`.
pub struct ClientSyncEngine<T: VaultTransport> {
    config: ClientConfig,
    transport: Arc<T>,
    store: Arc<OfflineStore>,
    events: broadcast::Sender<ClientEvent>,
    connectivity: RwLock<Connectivity>,
    stats: RwLock<ClientStats>,
    stream: Mutex<Option<StreamHandle>>,
    rejected_token: Mutex<Option<String>>,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl<T: VaultTransport + 'static> ClientSyncEngine<T> {
    /// Creates an engine. Call [`start`](Self::start) to begin checking.
    pub fn new(config: ClientConfig, transport: Arc<T>, store: Arc<OfflineStore>) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity);
        Arc::new(Self {
            config,
            transport,
            store,
            events,
            connectivity: RwLock::new(Connectivity::Unknown),
            stats: RwLock::new(ClientStats::default()),
            stream: Mutex::new(None),
            rejected_token: Mutex::new(None),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<OfflineStore> {
        &self.store
    }

    /// Returns a new receiver on the event bus.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Returns the last observed connectivity.
    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.read()
    }

    /// Returns true if the last check succeeded.
    pub fn is_online(&self) -> bool {
        self.connectivity().is_online()
    }

    /// Returns true while a snapshot stream is running.
    pub fn is_streaming(&self) -> bool {
        self.stream
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Returns the engine counters.
    pub fn stats(&self) -> ClientStats {
        self.stats.read().clone()
    }

    /// Creates an account and stores its token.
    pub async fn register(&self, username: &str, password: &str) -> ClientResult<()> {
        let token = self.transport.register(username, password).await?;
        self.adopt_token(token)
    }

    /// Logs in and stores the token.
    pub async fn login(&self, username: &str, password: &str) -> ClientResult<()> {
        let token = self.transport.login(username, password).await?;
        self.adopt_token(token)
    }

    fn adopt_token(&self, token: String) -> ClientResult<()> {
        self.store.update_state(|state| state.set_token(token))?;
        self.store.persist()?;
        let state = self.store.state();
        info!(user_id = ?state.user_id, client_id = %state.client_id, "session established");
        Ok(())
    }

    /// Publishes an auth failure once per rejected token.
    fn report_rejected(&self, token: String, error: &ClientError) {
        let mut rejected = self.rejected_token.lock();
        if rejected.as_deref() == Some(token.as_str()) {
            return;
        }
        *rejected = Some(token);
        drop(rejected);
        warn!(%error, "session rejected, log in again");
        self.publish(ClientEvent::Error(error.to_string()));
    }

    /// Spawns the connectivity watcher.
    pub fn start(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let cancel = self.root.child_token();
        self.tracker.spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.connectivity_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        engine.check_connectivity().await;
                    }
                }
            }
            debug!("connectivity watcher stopped");
        });
    }

    /// Runs one connectivity check and acts on the result.
    ///
    /// A transition to online reconciles the queue, subscribes and opens
    /// the stream; a transition to offline closes the stream. While online
    /// an ended stream is re-opened.
    pub async fn check_connectivity(self: &Arc<Self>) -> Connectivity {
        let reachable = match self.store.state().token {
            Some(token) => match self.transport.ping(&token).await {
                Ok(()) => {
                    self.rejected_token.lock().take();
                    true
                }
                Err(e) if e.is_auth_failure() => {
                    self.report_rejected(token, &e);
                    false
                }
                Err(e) => {
                    debug!(error = %e, "ping failed");
                    false
                }
            },
            None => false,
        };

        let (next, changed) = {
            let mut current = self.connectivity.write();
            let (next, changed) = current.observe(reachable);
            *current = next;
            (next, changed)
        };
        self.store.update_state(|state| state.online = next.is_online());

        if changed {
            if next.is_online() {
                info!("server reachable");
                self.publish(ClientEvent::Online);
                self.go_online().await;
            } else {
                info!("server unreachable, working offline");
                self.publish(ClientEvent::Offline);
                self.go_offline().await;
            }
        } else if next.is_online() && !self.is_streaming() {
            self.ensure_stream().await;
        }

        next
    }

    async fn go_online(self: &Arc<Self>) {
        if let Err(e) = self.reconcile().await {
            warn!(error = %e, "reconciliation incomplete");
            self.publish(ClientEvent::Error(e.to_string()));
        }
        self.ensure_stream().await;
    }

    async fn go_offline(&self) {
        if self.stop_stream() {
            self.unsubscribe_quietly().await;
        }
    }

    async fn ensure_stream(self: &Arc<Self>) {
        if self.is_streaming() {
            return;
        }
        let state = self.store.state();
        let Some(token) = state.token else {
            return;
        };

        let stream = match self.open_stream(&token, state.client_id).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "could not open snapshot stream");
                self.publish(ClientEvent::Error(e.to_string()));
                return;
            }
        };
        self.stats.write().streams_opened += 1;

        let cancel = self.root.child_token();
        let engine = Arc::clone(self);
        let task = self.tracker.spawn(engine.run_stream(stream, cancel.clone()));
        *self.stream.lock() = Some(StreamHandle { cancel, task });
    }

    async fn open_stream(
        &self,
        token: &str,
        client_id: ClientId,
    ) -> ClientResult<SnapshotStream> {
        self.transport.subscribe(token, client_id).await?;
        self.transport.open_stream(token, client_id).await
    }

    async fn run_stream(self: Arc<Self>, mut stream: SnapshotStream, cancel: CancellationToken) {
        info!("snapshot stream opened");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                item = stream.next() => match item {
                    Some(Ok(blocks)) => {
                        debug!(blocks = blocks.len(), "snapshot received");
                        self.store.replace_synced(blocks.clone());
                        self.stats.write().snapshots_received += 1;
                        self.publish(ClientEvent::Snapshot(blocks));
                    }
                    Some(Err(ClientError::DeadlineExceeded)) => {
                        debug!("stream reached its deadline");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "snapshot stream failed");
                        self.publish(ClientEvent::Error(e.to_string()));
                        break;
                    }
                    None => break,
                },
            }
        }
        info!("snapshot stream closed");
    }

    /// Cancels the stream task. Returns true if one was running.
    fn stop_stream(&self) -> bool {
        match self.stream.lock().take() {
            Some(handle) => {
                handle.cancel.cancel();
                !handle.task.is_finished()
            }
            None => false,
        }
    }

    async fn unsubscribe_quietly(&self) {
        let state = self.store.state();
        if let Some(token) = state.token {
            if let Err(e) = self.transport.unsubscribe(&token, state.client_id).await {
                debug!(error = %e, "unsubscribe failed");
            }
        }
    }

    /// Writes every queued block to the server.
    ///
    /// Writes run concurrently. Each success moves its block to the synced
    /// list (all in one step); failures stay queued for the next reconnect
    /// and the first one in queue order is returned. An empty queue makes
    /// no calls.
    pub async fn reconcile(&self) -> ClientResult<usize> {
        let queued = self.store.read_unsynced();
        if queued.is_empty() {
            return Ok(0);
        }
        let state = self.store.state();
        let token = state.require_token()?;
        let user_id = state.user_id.unwrap_or_default();

        info!(blocks = queued.len(), "reconciling offline writes");
        let results = join_all(
            queued
                .iter()
                .map(|block| self.transport.write_block(token, block.clone())),
        )
        .await;

        let mut confirmed = Vec::with_capacity(queued.len());
        let mut first_error = None;
        for (mut block, result) in queued.into_iter().zip(results) {
            match result {
                Ok(id) => {
                    block.id = id;
                    block.user_id = user_id;
                    confirmed.push(block);
                }
                Err(e) => {
                    warn!(title = %block.title, error = %e, "queued write failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        let moved = self.store.mark_synced_all(confirmed);
        {
            let mut stats = self.stats.write();
            stats.reconcile_passes += 1;
            stats.blocks_reconciled += moved as u64;
            if let Some(e) = &first_error {
                stats.last_error = Some(e.to_string());
            }
        }
        if moved > 0 {
            if let Err(e) = self.store.persist() {
                warn!(error = %e, "could not persist after reconciliation");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(moved),
        }
    }

    /// Saves a sealed block: to the server when online, to the offline
    /// queue otherwise.
    pub async fn save_block(&self, mut block: Block) -> ClientResult<SaveOutcome> {
        if !self.is_online() {
            debug!(title = %block.title, "offline, queueing block");
            self.store.save_unsynced(block);
            return Ok(SaveOutcome::Queued);
        }

        let state = self.store.state();
        let token = state.require_token()?;
        let id = self.transport.write_block(token, block.clone()).await?;
        block.id = id;
        block.user_id = state.user_id.unwrap_or_default();
        self.store.save_synced(block);
        Ok(SaveOutcome::Synced(id))
    }

    /// Seals `plaintext` under `password` and saves it. Uses the configured
    /// default profile when `profile` is `None`.
    pub async fn seal_and_save(
        &self,
        title: impl Into<String>,
        type_id: TypeId,
        plaintext: Vec<u8>,
        password: &[u8],
        profile: Option<Profile>,
    ) -> ClientResult<SaveOutcome> {
        if type_id == BlockKind::File.type_id() && plaintext.len() > BlockKind::MAX_FILE_SIZE {
            return Err(ClientError::InvalidArgument(format!(
                "file exceeds {} bytes",
                BlockKind::MAX_FILE_SIZE
            )));
        }

        let profile = profile.unwrap_or(self.config.default_profile);
        let plaintext = Zeroizing::new(plaintext);
        let password = Zeroizing::new(password.to_vec());
        // Argon2 runs on the blocking pool.
        let envelope = tokio::task::spawn_blocking(move || {
            Envelope::seal(&password, profile, &plaintext)
        })
        .await
        .map_err(|e| ClientError::Server(format!("sealing task failed: {}", e)))??;

        self.save_block(Block::new(title, type_id, envelope)).await
    }

    /// Returns every known block, synced first.
    pub fn list_blocks(&self) -> Vec<Block> {
        self.store.read_blocks()
    }

    /// Replaces the synced mirror with the server's list. Offline this is a
    /// no-op.
    pub async fn refresh(&self) -> ClientResult<()> {
        if !self.is_online() {
            return Ok(());
        }
        let state = self.store.state();
        let blocks = self
            .transport
            .list_blocks(state.require_token()?, state.client_id)
            .await?;
        self.store.replace_synced(blocks);
        Ok(())
    }

    /// Returns the type catalog: fetched and cached when online, from the
    /// cache otherwise.
    pub async fn list_types(&self) -> ClientResult<Vec<BlockType>> {
        if !self.is_online() {
            return Ok(self.store.read_types());
        }
        let state = self.store.state();
        let types = self.transport.list_types(state.require_token()?).await?;
        self.store.save_types(types.clone());
        Ok(types)
    }

    /// Decrypts a block. The block itself is never modified.
    pub async fn open_block(
        &self,
        block: &Block,
        password: &[u8],
    ) -> ClientResult<Zeroizing<Vec<u8>>> {
        let envelope = block.envelope.clone();
        let password = Zeroizing::new(password.to_vec());
        let plaintext = tokio::task::spawn_blocking(move || envelope.open(&password))
            .await
            .map_err(|e| ClientError::Server(format!("opening task failed: {}", e)))??;
        Ok(Zeroizing::new(plaintext))
    }

    /// Stops every background loop, waits for them, unsubscribes if a
    /// stream was open and persists the store.
    pub async fn shutdown(&self) -> ClientResult<()> {
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        let had_stream = self.stream.lock().take().is_some();

        if had_stream {
            self.unsubscribe_quietly().await;
        }
        self.store.update_state(|state| state.online = false);
        self.store.persist()?;
        info!("client shut down");
        Ok(())
    }

    fn publish(&self, event: ClientEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ClientState;
    use crate::transport::MockTransport;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        transport: Arc<MockTransport>,
        engine: Arc<ClientSyncEngine<MockTransport>>,
    }

    fn token_for(user_id: u64) -> String {
        let mut raw = user_id.to_be_bytes().to_vec();
        raw.extend_from_slice(&[0u8; 40]);
        URL_SAFE_NO_PAD.encode(raw)
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut state = ClientState::new();
        state.set_token(token_for(3)).unwrap();
        let store = Arc::new(OfflineStore::create(dir.path().join("state.json"), state).unwrap());
        let transport = Arc::new(MockTransport::new());
        let config = ClientConfig::new("unused", dir.path().join("state.json"))
            .with_connectivity_interval(Duration::from_millis(20))
            .with_default_profile(Profile::V1);
        let engine = ClientSyncEngine::new(config, Arc::clone(&transport), store);
        Fixture {
            _dir: dir,
            transport,
            engine,
        }
    }

    fn block(title: &str) -> Block {
        Block::new(
            title,
            1,
            Envelope::seal(b"pw", Profile::V1, title.as_bytes()).unwrap(),
        )
    }

    async fn next_event(rx: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn empty_queue_makes_no_calls() {
        let f = fixture();
        assert_eq!(f.engine.reconcile().await.unwrap(), 0);
        assert_eq!(f.transport.write_count(), 0);
    }

    #[tokio::test]
    async fn offline_save_then_reconnect() {
        let f = fixture();
        f.transport.set_online(false);
        assert_eq!(f.engine.check_connectivity().await, Connectivity::Offline);

        let outcome = f.engine.save_block(block("queued")).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Queued);
        assert_eq!(f.engine.store().count_unsynced(), 1);
        assert_eq!(f.transport.write_count(), 0);

        f.transport.set_online(true);
        assert_eq!(f.engine.check_connectivity().await, Connectivity::Online);
        assert_eq!(f.transport.write_count(), 1);
        assert_eq!(f.engine.store().count_unsynced(), 0);
        let synced = f.engine.store().read_synced();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].id, 1);
        assert_eq!(synced[0].user_id, 3);
    }

    #[tokio::test]
    async fn failed_writes_stay_queued() {
        let f = fixture();
        f.transport.set_online(false);
        f.engine.check_connectivity().await;
        for title in ["a", "bad", "c"] {
            f.engine.save_block(block(title)).await.unwrap();
        }

        f.transport.set_online(true);
        f.transport.fail_writes_titled("bad");
        let err = f.engine.reconcile().await.unwrap_err();
        assert!(matches!(err, ClientError::Server(_)));

        let pending: Vec<_> = f
            .engine
            .store()
            .read_unsynced()
            .into_iter()
            .map(|b| b.title)
            .collect();
        assert_eq!(pending, vec!["bad"]);
        assert_eq!(f.engine.store().read_synced().len(), 2);
        assert_eq!(f.engine.stats().blocks_reconciled, 2);
    }

    #[tokio::test]
    async fn transitions_are_published_once() {
        let f = fixture();
        let mut events = f.engine.events();

        f.engine.check_connectivity().await;
        assert_eq!(next_event(&mut events).await, ClientEvent::Online);
        // Initial snapshot from the stream.
        assert_eq!(next_event(&mut events).await, ClientEvent::Snapshot(vec![]));

        f.engine.check_connectivity().await;
        f.transport.set_online(false);
        f.engine.check_connectivity().await;
        f.engine.check_connectivity().await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let offline = seen.iter().filter(|e| **e == ClientEvent::Offline).count();
        assert_eq!(offline, 1);
        assert!(!seen.contains(&ClientEvent::Online));
        assert!(!f.engine.is_streaming());
    }

    #[tokio::test]
    async fn rejected_token_is_reported_once() {
        let f = fixture();
        let mut events = f.engine.events();
        f.transport.set_token_rejected(true);

        for _ in 0..3 {
            assert_eq!(f.engine.check_connectivity().await, Connectivity::Offline);
        }

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let errors: Vec<_> = seen
            .iter()
            .filter(|e| matches!(e, ClientEvent::Error(m) if m.contains("token expired")))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(f.transport.ping_count(), 3);

        // A fresh session that gets rejected again is reported again.
        f.engine
            .store()
            .update_state(|state| state.set_token(token_for(4)))
            .unwrap();
        f.engine.check_connectivity().await;
        assert!(matches!(events.try_recv(), Ok(ClientEvent::Error(_))));
    }

    #[tokio::test]
    async fn snapshots_replace_synced_mirror() {
        let f = fixture();
        let mut events = f.engine.events();
        f.engine.check_connectivity().await;
        assert!(f.engine.is_streaming());
        assert_eq!(f.transport.stream_count(), 1);

        let mut pushed = block("remote");
        pushed.id = 40;
        assert!(f.transport.push_snapshot(vec![pushed.clone()]));

        loop {
            if let ClientEvent::Snapshot(blocks) = next_event(&mut events).await {
                if blocks.len() == 1 {
                    assert_eq!(blocks[0], pushed);
                    break;
                }
            }
        }
        assert_eq!(f.engine.store().read_synced(), vec![pushed]);

        // A second online tick keeps the one stream.
        f.engine.check_connectivity().await;
        assert_eq!(f.transport.stream_count(), 1);
    }

    #[tokio::test]
    async fn ended_stream_is_reopened_while_online() {
        let f = fixture();
        f.engine.check_connectivity().await;
        assert!(f
            .transport
            .push_frame(lockbox_protocol::Response::error(
                lockbox_protocol::StatusCode::DeadlineExceeded,
                "deadline"
            )));

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.engine.is_streaming() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        f.engine.check_connectivity().await;
        assert!(f.engine.is_streaming());
        assert_eq!(f.transport.stream_count(), 2);
    }

    #[tokio::test]
    async fn types_cached_for_offline_use() {
        let f = fixture();
        f.engine.check_connectivity().await;
        assert_eq!(f.engine.list_types().await.unwrap().len(), 4);

        f.transport.set_online(false);
        f.engine.check_connectivity().await;
        assert_eq!(f.engine.list_types().await.unwrap(), BlockType::catalog());
    }

    #[tokio::test]
    async fn seal_and_save_then_open() {
        let f = fixture();
        f.engine.check_connectivity().await;
        let outcome = f
            .engine
            .seal_and_save("pin", 1, b"1234".to_vec(), b"master", None)
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Synced(1));

        let stored = f.transport.blocks().remove(0);
        assert_eq!(stored.envelope.profile, Profile::V1);
        assert_eq!(
            f.engine
                .open_block(&stored, b"master")
                .await
                .unwrap()
                .as_slice(),
            b"1234"
        );

        let before = stored.clone();
        assert!(matches!(
            f.engine.open_block(&stored, b"wrong").await,
            Err(ClientError::WrongCredential)
        ));
        assert_eq!(stored, before);
    }

    #[tokio::test]
    async fn oversized_file_rejected() {
        let f = fixture();
        let big = vec![0u8; BlockKind::MAX_FILE_SIZE + 1];
        let result = f
            .engine
            .seal_and_save("dump", BlockKind::File.type_id(), big, b"pw", None)
            .await;
        assert!(matches!(result, Err(ClientError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn watcher_and_shutdown() {
        let f = fixture();
        let mut events = f.engine.events();
        f.engine.start();
        assert_eq!(next_event(&mut events).await, ClientEvent::Online);

        f.engine.shutdown().await.unwrap();
        assert!(!f.engine.is_streaming());
        assert!(!f.transport.is_subscribed());

        let pings = f.transport.ping_count();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(f.transport.ping_count(), pings);

        let reloaded = OfflineStore::load(f.engine.store().path()).unwrap();
        assert_eq!(reloaded.state().user_id, Some(3));
    }
}
