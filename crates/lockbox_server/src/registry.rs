//! Per-user, per-client notification channels.
//!
//! A write for user U wakes every stream subscribed for U. Each
//! (user, client) pair owns one bounded channel; when it is full the new
//! notification is dropped instead of queued. Streams re-read storage on
//! every wakeup, so a dropped notification never loses data: the pending
//! one already guarantees a fresh snapshot.

use lockbox_protocol::{Block, ClientId, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// The blocks of a user at the time of a write.
pub type Snapshot = Arc<Vec<Block>>;

struct Slot {
    generation: u64,
    sender: mpsc::Sender<Snapshot>,
    receiver: Arc<Mutex<mpsc::Receiver<Snapshot>>>,
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The notification was queued.
    Delivered,
    /// A notification was already pending; this one was dropped.
    Coalesced,
    /// The subscription is gone.
    Closed,
}

/// Summary of a [`SubscriptionRegistry::notify`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Channels that accepted the notification.
    pub delivered: usize,
    /// Channels that already had one pending.
    pub coalesced: usize,
}

/// A sending handle to one client's channel.
#[derive(Clone)]
pub struct DeliveryHandle {
    sender: mpsc::Sender<Snapshot>,
}

impl DeliveryHandle {
    /// Attempts a non-blocking delivery.
    pub fn try_deliver(&self, snapshot: Snapshot) -> Delivery {
        match self.sender.try_send(snapshot) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Coalesced,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Why a stream could not attach to a subscription.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// No subscription exists for the pair.
    #[error("no subscription for user {user_id}")]
    NotSubscribed {
        /// User.
        user_id: UserId,
    },
    /// Another stream is already consuming the subscription.
    #[error("subscription already has an active stream")]
    Busy,
}

/// Exclusive consumer side of a subscription, held by one stream.
pub struct Attachment {
    user_id: UserId,
    client_id: ClientId,
    generation: u64,
    receiver: OwnedMutexGuard<mpsc::Receiver<Snapshot>>,
}

impl Attachment {
    /// Waits for the next notification.
    ///
    /// Returns `None` once the subscription has been removed.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.receiver.recv().await
    }

    /// The subscribed user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The subscribed client.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }
}

/// Thread-safe map from user to per-client notification channels.
///
/// All operations go through a single reader/writer lock.
pub struct SubscriptionRegistry {
    capacity: usize,
    generations: AtomicU64,
    subscribers: RwLock<HashMap<UserId, HashMap<ClientId, Slot>>>,
}

impl SubscriptionRegistry {
    /// Creates a registry with single-slot channels.
    pub fn new() -> Self {
        Self::with_capacity(1)
    }

    /// Creates a registry whose channels hold `capacity` notifications.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            generations: AtomicU64::new(0),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (user, client). Returns false if it was already registered,
    /// in which case the existing channel is kept untouched.
    pub fn subscribe(&self, user_id: UserId, client_id: ClientId) -> bool {
        let mut subscribers = self.subscribers.write();
        let clients = subscribers.entry(user_id).or_default();
        if clients.contains_key(&client_id) {
            debug!(user_id, %client_id, "already subscribed");
            return false;
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        clients.insert(
            client_id,
            Slot {
                generation,
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
            },
        );
        debug!(user_id, %client_id, "subscribed");
        true
    }

    /// Removes (user, client). Returns false if it was not registered.
    ///
    /// Dropping the channel's sender releases any stream waiting on it.
    pub fn unsubscribe(&self, user_id: UserId, client_id: ClientId) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(clients) = subscribers.get_mut(&user_id) else {
            return false;
        };
        let removed = clients.remove(&client_id).is_some();
        if clients.is_empty() {
            subscribers.remove(&user_id);
        }
        if removed {
            debug!(user_id, %client_id, "unsubscribed");
        }
        removed
    }

    /// Removes (user, client) only if it is still the registration the
    /// stream attached to.
    pub(crate) fn retire(&self, attachment: &Attachment) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(clients) = subscribers.get_mut(&attachment.user_id) else {
            return false;
        };
        let current = clients
            .get(&attachment.client_id)
            .is_some_and(|slot| slot.generation == attachment.generation);
        if current {
            clients.remove(&attachment.client_id);
        }
        if clients.is_empty() {
            subscribers.remove(&attachment.user_id);
        }
        current
    }

    /// Offers `snapshot` to every channel of `user_id` without blocking.
    pub fn notify(&self, user_id: UserId, snapshot: Snapshot) -> NotifyReport {
        let subscribers = self.subscribers.read();
        let mut report = NotifyReport::default();
        let Some(clients) = subscribers.get(&user_id) else {
            return report;
        };

        for (client_id, slot) in clients {
            match slot.sender.try_send(Arc::clone(&snapshot)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(user_id, %client_id, "notification channel full, coalescing");
                    report.coalesced += 1;
                }
                // The slot holds its own receiver, so the channel cannot close
                // while registered.
                Err(TrySendError::Closed(_)) => {}
            }
        }
        report
    }

    /// Returns delivery handles for every client of `user_id`.
    pub fn channels_for(&self, user_id: UserId) -> HashMap<ClientId, DeliveryHandle> {
        self.subscribers
            .read()
            .get(&user_id)
            .map(|clients| {
                clients
                    .iter()
                    .map(|(client_id, slot)| {
                        (
                            *client_id,
                            DeliveryHandle {
                                sender: slot.sender.clone(),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Takes exclusive ownership of the consumer side of (user, client).
    pub fn attach(&self, user_id: UserId, client_id: ClientId) -> Result<Attachment, AttachError> {
        let subscribers = self.subscribers.read();
        let slot = subscribers
            .get(&user_id)
            .and_then(|clients| clients.get(&client_id))
            .ok_or(AttachError::NotSubscribed { user_id })?;

        let receiver = Arc::clone(&slot.receiver)
            .try_lock_owned()
            .map_err(|_| AttachError::Busy)?;

        Ok(Attachment {
            user_id,
            client_id,
            generation: slot.generation,
            receiver,
        })
    }

    /// Returns true if (user, client) is registered.
    pub fn is_subscribed(&self, user_id: UserId, client_id: ClientId) -> bool {
        self.subscribers
            .read()
            .get(&user_id)
            .is_some_and(|clients| clients.contains_key(&client_id))
    }

    /// Returns the number of clients registered for `user_id`.
    pub fn subscriber_count(&self, user_id: UserId) -> usize {
        self.subscribers
            .read()
            .get(&user_id)
            .map_or(0, HashMap::len)
    }

    /// Returns the total number of registrations.
    pub fn len(&self) -> usize {
        self.subscribers.read().values().map(HashMap::len).sum()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn snapshot(n: usize) -> Snapshot {
        Arc::new(Vec::with_capacity(n))
    }

    #[test]
    fn duplicate_subscribe_is_noop() {
        let registry = SubscriptionRegistry::new();
        let client = Uuid::new_v4();

        assert!(registry.subscribe(1, client));
        assert!(!registry.subscribe(1, client));
        assert_eq!(registry.subscriber_count(1), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_subscribe_keeps_pending_notification() {
        let registry = SubscriptionRegistry::new();
        let client = Uuid::new_v4();
        registry.subscribe(1, client);

        assert_eq!(registry.notify(1, snapshot(0)).delivered, 1);
        registry.subscribe(1, client);

        // Still full: the first channel survived.
        assert_eq!(registry.notify(1, snapshot(0)).coalesced, 1);
    }

    #[test]
    fn unsubscribe_removes_entry() {
        let registry = SubscriptionRegistry::new();
        let client = Uuid::new_v4();
        registry.subscribe(1, client);

        assert!(registry.unsubscribe(1, client));
        assert!(!registry.unsubscribe(1, client));
        assert!(!registry.is_subscribed(1, client));
        assert!(registry.is_empty());
        assert_eq!(registry.notify(1, snapshot(0)), NotifyReport::default());
    }

    #[test]
    fn notify_fans_out_to_user_only() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(1, Uuid::new_v4());
        registry.subscribe(1, Uuid::new_v4());
        registry.subscribe(2, Uuid::new_v4());

        let report = registry.notify(1, snapshot(0));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.coalesced, 0);
    }

    #[test]
    fn full_channel_coalesces() {
        let registry = SubscriptionRegistry::new();
        let client = Uuid::new_v4();
        registry.subscribe(1, client);

        assert_eq!(registry.notify(1, snapshot(0)).delivered, 1);
        for _ in 0..100 {
            assert_eq!(registry.notify(1, snapshot(0)).coalesced, 1);
        }
    }

    #[test]
    fn channels_for_returns_handles() {
        let registry = SubscriptionRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.subscribe(1, a);
        registry.subscribe(1, b);

        let channels = registry.channels_for(1);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[&a].try_deliver(snapshot(0)), Delivery::Delivered);
        assert_eq!(channels[&a].try_deliver(snapshot(0)), Delivery::Coalesced);
        assert!(registry.channels_for(9).is_empty());
    }

    #[test]
    fn attach_requires_subscription() {
        let registry = SubscriptionRegistry::new();
        assert!(matches!(
            registry.attach(1, Uuid::new_v4()),
            Err(AttachError::NotSubscribed { user_id: 1 })
        ));
    }

    #[test]
    fn attach_is_exclusive() {
        let registry = SubscriptionRegistry::new();
        let client = Uuid::new_v4();
        registry.subscribe(1, client);

        let first = registry.attach(1, client).unwrap();
        assert_eq!(registry.attach(1, client).err(), Some(AttachError::Busy));
        drop(first);
        assert!(registry.attach(1, client).is_ok());
    }

    #[tokio::test]
    async fn burst_leaves_one_pending_notification() {
        let registry = SubscriptionRegistry::new();
        let client = Uuid::new_v4();
        registry.subscribe(1, client);
        let mut attachment = registry.attach(1, client).unwrap();

        for n in 0..10 {
            registry.notify(1, snapshot(n));
        }
        assert!(attachment.recv().await.is_some());

        // Channel is free again after the consumer drained it.
        assert_eq!(registry.notify(1, snapshot(0)).delivered, 1);
    }

    #[tokio::test]
    async fn unsubscribe_releases_waiting_consumer() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let client = Uuid::new_v4();
        registry.subscribe(1, client);
        let mut attachment = registry.attach(1, client).unwrap();

        let waiter = tokio::spawn(async move { attachment.recv().await });
        tokio::task::yield_now().await;
        registry.unsubscribe(1, client);

        assert!(waiter.await.unwrap().is_none());
    }

    #[test]
    fn retire_ignores_newer_registration() {
        let registry = SubscriptionRegistry::new();
        let client = Uuid::new_v4();
        registry.subscribe(1, client);
        let stale = registry.attach(1, client).unwrap();

        registry.unsubscribe(1, client);
        registry.subscribe(1, client);

        assert!(!registry.retire(&stale));
        assert!(registry.is_subscribed(1, client));
    }

    #[test]
    fn concurrent_subscribers_stay_unique() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let client = Uuid::new_v4();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.subscribe(1, client))
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();

        assert_eq!(created, 1);
        assert_eq!(registry.subscriber_count(1), 1);
    }
}
