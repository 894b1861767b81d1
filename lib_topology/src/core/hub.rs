//! # Broadcast Hub
//!
//! Owns the set of live topology viewers. Whenever a [`ChangeEvent`] arrives
//! the hub rebuilds the [`TopologySnapshot`] from the store and pushes the
//! same `Arc` to every subscriber; a new subscriber gets one snapshot right
//! away.
//!
//! ## Delivery rules
//!
//! - Pushes are best effort. A subscriber whose push fails is removed on the
//!   spot and never retried; the others are unaffected.
//! - Subscription and broadcast hold the same async lock across build and
//!   push, so snapshots reach every subscriber in the order they were built
//!   and a newcomer can never see an older snapshot after a newer one.
//! - A store failure while rebuilding skips that event; nobody is pruned.
//! - Channel subscribers hold only the latest snapshot. A slow viewer skips
//!   the ones it had no time to send.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::events::{ChangeEvent, EventReceiver};
use crate::core::topology::{self, TopologySnapshot};
use crate::error::{DeliveryError, StoreError};
use crate::store::StateStore;

/// Identifies one subscriber for the lifetime of the hub.
pub type SubscriberId = u64;

/// Where snapshots for one subscriber go.
///
/// `push` must not block: it hands the snapshot to whatever task writes to
/// the viewer. An error marks the subscriber as gone.
pub trait SnapshotSink: Send + Sync + 'static {
    fn push(&self, id: SubscriberId, snapshot: &Arc<TopologySnapshot>) -> Result<(), DeliveryError>;
}

/// Replaces the receiver's pending snapshot; fails once the receiver is dropped.
impl SnapshotSink for watch::Sender<Arc<TopologySnapshot>> {
    fn push(&self, id: SubscriberId, snapshot: &Arc<TopologySnapshot>) -> Result<(), DeliveryError> {
        self.send(Arc::clone(snapshot))
            .map_err(|_| DeliveryError::Disconnected(id))
    }
}

struct Subscriber {
    id: SubscriberId,
    sink: Box<dyn SnapshotSink>,
}

/// Fans topology snapshots out to live subscribers.
pub struct BroadcastHub<S> {
    store: Arc<S>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl<S: StateStore> BroadcastHub<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `sink` and pushes the current snapshot to it.
    ///
    /// If the store cannot be read the subscriber is still registered and
    /// gets its first snapshot with the next change. If the first push
    /// fails the subscriber is not registered.
    pub async fn subscribe<K: SnapshotSink>(&self, sink: K) -> Result<SubscriberId, DeliveryError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().await;

        match topology::snapshot(self.store.as_ref()).await {
            Ok(snapshot) => sink.push(id, &Arc::new(snapshot))?,
            Err(e) => error!(subscriber = id, error = %e, "no initial snapshot for new subscriber"),
        }

        subscribers.push(Subscriber { id, sink: Box::new(sink) });
        info!(subscriber = id, total = subscribers.len(), "subscriber registered");
        Ok(id)
    }

    /// Registers a channel subscriber and returns the receiving half.
    ///
    /// The receiver starts with an empty snapshot already marked as seen, so
    /// `changed()` first resolves with the initial push.
    pub async fn subscribe_channel(
        &self,
    ) -> Result<(SubscriberId, watch::Receiver<Arc<TopologySnapshot>>), DeliveryError> {
        let (tx, rx) = watch::channel(Arc::new(TopologySnapshot::default()));
        let id = self.subscribe(tx).await?;
        Ok((id, rx))
    }

    /// Removes a subscriber. Returns whether it was registered.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        if removed {
            info!(subscriber = id, total = subscribers.len(), "subscriber removed");
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Rebuilds the snapshot and pushes it to every subscriber, pruning
    /// those whose push fails. Returns how many subscribers received it.
    pub async fn broadcast(&self) -> Result<usize, StoreError> {
        let mut subscribers = self.subscribers.lock().await;
        let snapshot = Arc::new(topology::snapshot(self.store.as_ref()).await?);

        subscribers.retain(|subscriber| match subscriber.sink.push(subscriber.id, &snapshot) {
            Ok(()) => true,
            Err(e) => {
                info!(subscriber = subscriber.id, reason = %e, "dropping subscriber");
                false
            }
        });
        debug!(delivered = subscribers.len(), nodes = snapshot.nodes.len(), "snapshot broadcast");
        Ok(subscribers.len())
    }

    /// Handles one change event.
    pub async fn handle(&self, event: &ChangeEvent) {
        debug!(device = %event.device, kind = %event.kind, "change event");
        if let Err(e) = self.broadcast().await {
            error!(device = %event.device, error = %e, "failed to rebuild topology, skipping event");
        }
    }

    /// Consumes change events until cancelled or until every producer is gone.
    pub async fn run(&self, mut events: EventReceiver, cancel: CancellationToken) {
        info!("broadcast hub started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Some(event) => self.handle(&event).await,
                None => break,
            }
        }
        info!("broadcast hub stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Record, ResourceKind};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_new_subscriber_gets_current_snapshot() {
        let store = Arc::new(MemoryStore::new());
        store
            .apply(
                "R1",
                ResourceKind::Interface,
                vec![Record::new(ResourceKind::Interface, "R1", "eth0", "10.0.0.1".parse().unwrap(), 1)],
            )
            .await
            .unwrap();

        let hub = BroadcastHub::new(store);
        let (_, mut rx) = hub.subscribe_channel().await.unwrap();
        rx.changed().await.unwrap();
        let first = Arc::clone(&rx.borrow_and_update());
        assert_eq!(first.nodes.len(), 1);
        assert_eq!(first.nodes[0].name, "R1");
    }

    #[tokio::test]
    async fn test_closed_receiver_is_pruned_on_broadcast() {
        let hub = BroadcastHub::new(Arc::new(MemoryStore::new()));
        let (_, keep) = hub.subscribe_channel().await.unwrap();
        let (_, gone) = hub.subscribe_channel().await.unwrap();
        drop(gone);

        assert_eq!(hub.broadcast().await.unwrap(), 1);
        assert_eq!(hub.subscriber_count().await, 1);
        assert!(keep.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_slow_viewer_only_holds_latest_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let hub = BroadcastHub::new(Arc::clone(&store));
        let (_, mut rx) = hub.subscribe_channel().await.unwrap();

        for (i, device) in ["R1", "R2", "R3"].into_iter().enumerate() {
            let ip = format!("10.0.0.{}", i + 1).parse().unwrap();
            store
                .apply(
                    device,
                    ResourceKind::Interface,
                    vec![Record::new(ResourceKind::Interface, device, "eth0", ip, 1)],
                )
                .await
                .unwrap();
            hub.broadcast().await.unwrap();
        }

        // Four pushes, one pending value: the newest.
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().nodes.len(), 3);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let hub = BroadcastHub::new(Arc::new(MemoryStore::new()));
        let (id, _rx) = hub.subscribe_channel().await.unwrap();
        assert!(hub.unsubscribe(id).await);
        assert!(!hub.unsubscribe(id).await);
        assert_eq!(hub.subscriber_count().await, 0);
    }
}
