//! Long-lived snapshot streams.
//!
//! A stream sends the caller's full block list as soon as it opens and
//! again after every notification, until one of:
//! - the absolute deadline (measured from stream start, never extended),
//!   which also removes the subscription;
//! - client cancellation or a dropped receiver, which leaves the
//!   subscription in place;
//! - an explicit unsubscribe, which closes the notification channel.

use crate::error::{ServerError, ServerResult};
use crate::registry::{AttachError, SubscriptionRegistry};
use crate::service::StorageService;
use lockbox_protocol::{ClientId, Response, StatusCode, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The deadline passed; the subscription was removed.
    TimedOut,
    /// The client cancelled or stopped reading.
    ClientClosed,
    /// The subscription was removed while the stream waited.
    Unsubscribed,
}

impl StreamEnd {
    /// Returns the terminal frame for this ending.
    pub fn terminal_frame(self) -> Response {
        match self {
            StreamEnd::TimedOut => {
                Response::error(StatusCode::DeadlineExceeded, "stream deadline exceeded")
            }
            StreamEnd::ClientClosed | StreamEnd::Unsubscribed => Response::End,
        }
    }
}

/// Result of a finished stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    /// How the stream ended.
    pub end: StreamEnd,
    /// Number of snapshot frames sent, including the initial one.
    pub snapshots_sent: usize,
}

/// Runs snapshot streams for subscribed clients.
pub struct StreamingSyncServer {
    registry: Arc<SubscriptionRegistry>,
    service: Arc<StorageService>,
    deadline: Duration,
}

impl StreamingSyncServer {
    /// Creates a stream runner.
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        service: Arc<StorageService>,
        deadline: Duration,
    ) -> Self {
        Self {
            registry,
            service,
            deadline,
        }
    }

    /// Returns the stream deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Streams snapshots for (user, client) into `sink`.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotFound`] if the pair is not subscribed,
    /// [`ServerError::AlreadyExists`] if another stream holds it, and
    /// [`ServerError::Internal`] if storage fails mid-stream.
    pub async fn serve(
        &self,
        user_id: UserId,
        client_id: ClientId,
        sink: mpsc::Sender<Response>,
        cancel: CancellationToken,
    ) -> ServerResult<StreamOutcome> {
        let deadline = Instant::now() + self.deadline;
        let mut attachment = self
            .registry
            .attach(user_id, client_id)
            .map_err(|e| match e {
                AttachError::NotSubscribed { .. } => {
                    ServerError::NotFound(format!("no subscription for user {}", user_id))
                }
                AttachError::Busy => ServerError::AlreadyExists(e.to_string()),
            })?;

        info!(user_id, %client_id, "stream opened");
        let mut snapshots_sent = 0;

        let blocks = self.service.list_blocks(user_id)?;
        let end = match deliver(&sink, Response::Snapshot { blocks }, deadline, &cancel).await {
            Err(end) => end,
            Ok(()) => loop {
                snapshots_sent += 1;
                let snapshot = tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break StreamEnd::ClientClosed,
                    _ = sink.closed() => break StreamEnd::ClientClosed,
                    _ = sleep_until(deadline) => break StreamEnd::TimedOut,
                    notification = attachment.recv() => match notification {
                        Some(snapshot) => snapshot,
                        None => break StreamEnd::Unsubscribed,
                    },
                };
                debug!(user_id, %client_id, notified = snapshot.len(), "refreshing snapshot");

                // Storage is authoritative; the notified list may already be stale.
                let blocks = self.service.list_blocks(user_id)?;
                if let Err(end) =
                    deliver(&sink, Response::Snapshot { blocks }, deadline, &cancel).await
                {
                    break end;
                }
            },
        };

        if end == StreamEnd::TimedOut {
            self.registry.retire(&attachment);
        }

        info!(user_id, %client_id, ?end, snapshots_sent, "stream finished");
        Ok(StreamOutcome {
            end,
            snapshots_sent,
        })
    }
}

/// Sends one frame. A reader that stops draining cannot hold the stream
/// past its deadline or past cancellation.
async fn deliver(
    sink: &mpsc::Sender<Response>,
    response: Response,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<(), StreamEnd> {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(StreamEnd::ClientClosed),
        _ = sleep_until(deadline) => Err(StreamEnd::TimedOut),
        sent = sink.send(response) => sent.map_err(|_| StreamEnd::ClientClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlockStore;
    use lockbox_crypto::{Envelope, Profile};
    use lockbox_protocol::Block;
    use uuid::Uuid;

    struct Fixture {
        registry: Arc<SubscriptionRegistry>,
        service: Arc<StorageService>,
        streams: Arc<StreamingSyncServer>,
    }

    fn fixture(deadline: Duration) -> Fixture {
        let registry = Arc::new(SubscriptionRegistry::new());
        let service = Arc::new(StorageService::new(
            Arc::new(MemoryBlockStore::new()),
            Arc::clone(&registry),
        ));
        let streams = Arc::new(StreamingSyncServer::new(
            Arc::clone(&registry),
            Arc::clone(&service),
            deadline,
        ));
        Fixture {
            registry,
            service,
            streams,
        }
    }

    fn block(title: &str) -> Block {
        Block::new(title, 1, Envelope::seal(b"pw", Profile::V1, b"x").unwrap())
    }

    fn snapshot_len(response: Response) -> usize {
        match response {
            Response::Snapshot { blocks } => blocks.len(),
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn requires_subscription() {
        let f = fixture(Duration::from_secs(60));
        let (tx, _rx) = mpsc::channel(4);
        let result = f
            .streams
            .serve(1, Uuid::new_v4(), tx, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ServerError::NotFound(_))));
    }

    #[tokio::test]
    async fn initial_snapshot_then_updates() {
        let f = fixture(Duration::from_secs(60));
        let client = Uuid::new_v4();
        f.registry.subscribe(1, client);
        f.service.save_block(1, block("before")).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let streams = Arc::clone(&f.streams);
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { streams.serve(1, client, tx, cancel).await }
        });

        // The pending notification from the earlier save may add one frame.
        assert_eq!(snapshot_len(rx.recv().await.unwrap()), 1);
        f.service.save_block(1, block("after")).unwrap();
        let mut latest = snapshot_len(rx.recv().await.unwrap());
        while latest < 2 {
            latest = snapshot_len(rx.recv().await.unwrap());
        }
        assert_eq!(latest, 2);

        cancel.cancel();
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.end, StreamEnd::ClientClosed);
        // Cancellation keeps the subscription.
        assert!(f.registry.is_subscribed(1, client));
    }

    #[tokio::test]
    async fn deadline_removes_subscription() {
        let f = fixture(Duration::from_millis(50));
        let client = Uuid::new_v4();
        f.registry.subscribe(1, client);

        let (tx, mut rx) = mpsc::channel(4);
        let outcome = f
            .streams
            .serve(1, client, tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.end, StreamEnd::TimedOut);
        assert_eq!(outcome.snapshots_sent, 1);
        assert!(!f.registry.is_subscribed(1, client));
        assert_eq!(snapshot_len(rx.recv().await.unwrap()), 0);
        assert!(matches!(
            outcome.end.terminal_frame(),
            Response::Error {
                code: StatusCode::DeadlineExceeded,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn deadline_is_not_extended_by_activity() {
        let f = fixture(Duration::from_millis(200));
        let client = Uuid::new_v4();
        f.registry.subscribe(1, client);

        let (tx, mut rx) = mpsc::channel(16);
        let streams = Arc::clone(&f.streams);
        let started = Instant::now();
        let task = tokio::spawn(async move {
            streams.serve(1, client, tx, CancellationToken::new()).await
        });

        rx.recv().await.unwrap();
        for i in 0..3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            f.service.save_block(1, block(&format!("b{}", i))).unwrap();
        }

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.end, StreamEnd::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn unsubscribe_ends_stream() {
        let f = fixture(Duration::from_secs(60));
        let client = Uuid::new_v4();
        f.registry.subscribe(1, client);

        let (tx, mut rx) = mpsc::channel(4);
        let streams = Arc::clone(&f.streams);
        let task = tokio::spawn(async move {
            streams.serve(1, client, tx, CancellationToken::new()).await
        });

        rx.recv().await.unwrap();
        f.registry.unsubscribe(1, client);

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.end, StreamEnd::Unsubscribed);
        assert_eq!(outcome.end.terminal_frame(), Response::End);
    }

    #[tokio::test]
    async fn dropped_receiver_ends_stream() {
        let f = fixture(Duration::from_secs(60));
        let client = Uuid::new_v4();
        f.registry.subscribe(1, client);

        let (tx, mut rx) = mpsc::channel(4);
        let streams = Arc::clone(&f.streams);
        let task = tokio::spawn(async move {
            streams.serve(1, client, tx, CancellationToken::new()).await
        });

        rx.recv().await.unwrap();
        drop(rx);

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.end, StreamEnd::ClientClosed);
        assert!(f.registry.is_subscribed(1, client));
    }

    #[tokio::test]
    async fn second_stream_for_same_client_rejected() {
        let f = fixture(Duration::from_secs(60));
        let client = Uuid::new_v4();
        f.registry.subscribe(1, client);

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let streams = Arc::clone(&f.streams);
        let first = tokio::spawn({
            let cancel = cancel.clone();
            async move { streams.serve(1, client, tx, cancel).await }
        });
        rx.recv().await.unwrap();

        let (tx2, _rx2) = mpsc::channel(4);
        let second = f
            .streams
            .serve(1, client, tx2, CancellationToken::new())
            .await;
        assert!(matches!(second, Err(ServerError::AlreadyExists(_))));

        cancel.cancel();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stalled_reader_still_hits_deadline() {
        let f = fixture(Duration::from_millis(100));
        let client = Uuid::new_v4();
        f.registry.subscribe(1, client);

        // The initial snapshot fills the only slot and nobody drains it.
        let (tx, _rx) = mpsc::channel(1);
        let streams = Arc::clone(&f.streams);
        let task = tokio::spawn(async move {
            streams.serve(1, client, tx, CancellationToken::new()).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        f.service.save_block(1, block("stuck")).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("stream outlived its deadline")
            .unwrap()
            .unwrap();
        assert_eq!(outcome.end, StreamEnd::TimedOut);
        assert_eq!(outcome.snapshots_sent, 1);
        assert!(!f.registry.is_subscribed(1, client));
    }

    #[tokio::test]
    async fn stalled_reader_still_observes_cancel() {
        let f = fixture(Duration::from_secs(60));
        let client = Uuid::new_v4();
        f.registry.subscribe(1, client);

        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let streams = Arc::clone(&f.streams);
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { streams.serve(1, client, tx, cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        f.service.save_block(1, block("stuck")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("stream ignored cancellation")
            .unwrap()
            .unwrap();
        assert_eq!(outcome.end, StreamEnd::ClientClosed);
        assert!(f.registry.is_subscribed(1, client));
    }
}
