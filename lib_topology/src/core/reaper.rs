//! # Stale Reaper
//!
//! Devices do not withdraw neighbors when they stop reporting; they just go
//! quiet. The reaper polls one device's neighbor records on a fixed interval
//! and asks a [`StalenessPolicy`] which of them are stale. Stale records are
//! removed with a compare-and-delete, so a collector refresh that lands
//! between the read and the delete wins. A cycle that removes anything emits
//! one [`ChangeKind::Generic`](crate::core::ChangeKind::Generic) event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::events::{ChangeEvent, EventSender};
use crate::error::StoreError;
use crate::model::{Record, RecordKey, ResourceKind};
use crate::store::StateStore;

pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5);

/// Decides which records of one poll are stale.
///
/// Implementations keep whatever per-key history they need between polls.
pub trait StalenessPolicy: Send + 'static {
    /// Returns the records among `current` to evict. Called once per poll
    /// with the device's full current neighbor set.
    fn stale(&mut self, current: &[Record]) -> Vec<Record>;
}

/// A record is stale when its timestamp did not move since the previous poll.
///
/// A record first seen at a poll is never stale at that poll, so eviction
/// takes at least one full interval without a refresh.
#[derive(Debug, Default)]
pub struct UnchangedTimestampPolicy {
    previous: HashMap<RecordKey, u64>,
}

impl StalenessPolicy for UnchangedTimestampPolicy {
    fn stale(&mut self, current: &[Record]) -> Vec<Record> {
        let stale = current
            .iter()
            .filter(|record| self.previous.get(&record.key()) == Some(&record.observed_at()))
            .cloned()
            .collect::<Vec<_>>();

        self.previous = current
            .iter()
            .filter(|record| !stale.contains(record))
            .map(|record| (record.key(), record.observed_at()))
            .collect();
        stale
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Periodically evicts one device's stale neighbor records.
pub struct Reaper<S, P = UnchangedTimestampPolicy> {
    device: String,
    store: Arc<S>,
    events: EventSender,
    interval: Duration,
    policy: P,
}

impl<S: StateStore> Reaper<S> {
    pub fn new(device: impl Into<String>, store: Arc<S>, events: EventSender, interval: Duration) -> Self {
        Self::with_policy(device, store, events, interval, UnchangedTimestampPolicy::default())
    }
}

impl<S: StateStore, P: StalenessPolicy> Reaper<S, P> {
    pub fn with_policy(
        device: impl Into<String>,
        store: Arc<S>,
        events: EventSender,
        interval: Duration,
        policy: P,
    ) -> Self {
        Self {
            device: device.into(),
            store,
            events,
            interval,
            policy,
        }
    }

    /// Runs one poll. Returns the keys that were evicted.
    pub async fn sweep(&mut self) -> Result<Vec<RecordKey>, StoreError> {
        let current = self
            .store
            .device_records(&self.device, ResourceKind::Neighbor)
            .await?;

        let mut removed = Vec::new();
        for record in self.policy.stale(&current) {
            let key = record.key();
            if self
                .store
                .remove_if_observed_at(ResourceKind::Neighbor, &key, record.observed_at())
                .await?
            {
                debug!(device = %self.device, %key, "evicted stale neighbor");
                removed.push(key);
            }
        }
        Ok(removed)
    }

    /// Polls until cancelled or until the change channel closes. Waiting on
    /// a full change channel still observes cancellation.
    pub async fn run(mut self, cancel: CancellationToken) {
        // The first tick fires at once; skip it so a fresh device gets one
        // full interval before its first poll.
        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(device = %self.device, interval_ms = millis(self.interval), "reaper started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let removed = match self.sweep().await {
                Ok(removed) => removed,
                Err(e) => {
                    error!(device = %self.device, error = %e, "reaper cycle failed, skipping");
                    continue;
                }
            };
            if removed.is_empty() {
                continue;
            }

            info!(device = %self.device, removed = removed.len(), "stale neighbors evicted");
            let mut event = ChangeEvent::generic(self.device.clone());
            event.removed = removed;
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = self.events.send(event) => sent,
            };
            if sent.is_err() {
                warn!(device = %self.device, "change channel closed");
                break;
            }
        }

        info!(device = %self.device, "reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events;
    use crate::store::MemoryStore;

    fn nbr(local: &str, ts: u64) -> Record {
        Record::new(ResourceKind::Neighbor, "R1", local, "10.0.0.2".parse().unwrap(), ts)
    }

    #[test]
    fn test_policy_needs_two_polls_with_same_timestamp() {
        let mut policy = UnchangedTimestampPolicy::default();
        assert!(policy.stale(&[nbr("Gi0", 1)]).is_empty());
        assert!(policy.stale(&[nbr("Gi0", 2)]).is_empty());
        assert_eq!(policy.stale(&[nbr("Gi0", 2)]), vec![nbr("Gi0", 2)]);
    }

    #[test]
    fn test_policy_forgets_evicted_keys() {
        let mut policy = UnchangedTimestampPolicy::default();
        policy.stale(&[nbr("Gi0", 1)]);
        assert_eq!(policy.stale(&[nbr("Gi0", 1)]).len(), 1);
        // The same key coming back with the same timestamp starts over.
        assert!(policy.stale(&[nbr("Gi0", 1)]).is_empty());
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_secs(5)), 5_000);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_unrefreshed_records() {
        let store = Arc::new(MemoryStore::new());
        let (tx, _rx) = events::channel(8);
        let mut reaper = Reaper::new("R1", Arc::clone(&store), tx, DEFAULT_REAP_INTERVAL);

        store
            .apply("R1", ResourceKind::Neighbor, vec![nbr("Gi0", 1), nbr("Gi1", 1)])
            .await
            .unwrap();
        assert!(reaper.sweep().await.unwrap().is_empty());

        // Gi0 keeps reporting, Gi1 goes quiet.
        store
            .apply("R1", ResourceKind::Neighbor, vec![nbr("Gi0", 2), nbr("Gi1", 1)])
            .await
            .unwrap();
        let removed = reaper.sweep().await.unwrap();
        assert_eq!(removed, vec![RecordKey::new("R1", "Gi1")]);

        let left = store.device_records("R1", ResourceKind::Neighbor).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].key().name, "Gi0");
    }

    #[tokio::test]
    async fn test_neighbor_refreshed_after_clock_step_back_is_kept() {
        let store = Arc::new(MemoryStore::new());
        let (tx, _rx) = events::channel(8);
        let mut reaper = Reaper::new("R1", Arc::clone(&store), tx, DEFAULT_REAP_INTERVAL);

        store
            .apply("R1", ResourceKind::Neighbor, vec![nbr("Gi0", 1_000_000)])
            .await
            .unwrap();
        assert!(reaper.sweep().await.unwrap().is_empty());

        // Still reported, with an older device timestamp.
        store
            .apply("R1", ResourceKind::Neighbor, vec![nbr("Gi0", 500_000)])
            .await
            .unwrap();
        assert!(reaper.sweep().await.unwrap().is_empty());
        assert_eq!(store.device_records("R1", ResourceKind::Neighbor).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_change_channel_is_full() {
        let store = Arc::new(MemoryStore::new());
        let (tx, _rx) = events::channel(1);
        tx.send(ChangeEvent::generic("other")).await.unwrap();
        store
            .apply("R1", ResourceKind::Neighbor, vec![nbr("Gi0", 1)])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let reaper = Reaper::new("R1", Arc::clone(&store), tx, Duration::from_secs(5));
        let run = tokio::spawn(reaper.run(cancel.clone()));

        // Evicts at t=10s, then blocks reporting it.
        time::sleep(Duration::from_secs(11)).await;
        assert!(store.device_records("R1", ResourceKind::Neighbor).await.unwrap().is_empty());
        assert!(!run.is_finished());

        cancel.cancel();
        time::timeout(Duration::from_secs(1), run).await.unwrap().unwrap();
    }
}
