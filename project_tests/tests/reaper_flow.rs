use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lib_topology::core::{ChangeKind, Collector, Reaper, StalenessPolicy, events};
use lib_topology::store::{MemoryStore, StateStore};
use lib_topology::transport::ChannelTransport;
use lib_topology::{Record, RecordKey, ResourceKind};
use project_tests::{device, drain_events, neighbor_message, next_event};

fn nbr(local: &str, ts: u64) -> Record {
    Record::new(ResourceKind::Neighbor, "R1", local, "10.0.0.2".parse().unwrap(), ts)
}

#[tokio::test(start_paused = true)]
async fn test_reaper_evicts_only_after_a_full_quiet_interval() {
    let store = Arc::new(MemoryStore::new());
    let (events_tx, mut events_rx) = events::channel(8);
    let cancel = CancellationToken::new();

    store
        .apply("R1", ResourceKind::Neighbor, vec![nbr("Gi0", 1), nbr("Gi1", 1)])
        .await
        .unwrap();

    let reaper = Reaper::new("R1", Arc::clone(&store), events_tx, Duration::from_secs(5));
    let run = tokio::spawn(reaper.run(cancel.clone()));

    // First poll at t=5s only records what it saw.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(drain_events(&mut events_rx).is_empty());

    // Gi0 keeps reporting; Gi1 does not.
    store
        .apply("R1", ResourceKind::Neighbor, vec![nbr("Gi0", 2), nbr("Gi1", 1)])
        .await
        .unwrap();

    // Second poll at t=10s evicts Gi1 only.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let events = drain_events(&mut events_rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::Generic);
    assert_eq!(events[0].removed, vec![RecordKey::new("R1", "Gi1")]);

    let left = store.device_records("R1", ResourceKind::Neighbor).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].key().name, "Gi0");

    cancel.cancel();
    run.await.unwrap();
}

/// Evicts everything it is shown.
struct EvictAll;

impl StalenessPolicy for EvictAll {
    fn stale(&mut self, current: &[Record]) -> Vec<Record> {
        current.to_vec()
    }
}

#[tokio::test]
async fn test_policy_is_swappable_and_refresh_wins_compare_and_delete() {
    let store = Arc::new(MemoryStore::new());
    let (events_tx, _events_rx) = events::channel(8);
    store
        .apply("R1", ResourceKind::Neighbor, vec![nbr("Gi0", 1)])
        .await
        .unwrap();

    let mut reaper = Reaper::with_policy("R1", Arc::clone(&store), events_tx, Duration::from_secs(5), EvictAll);
    assert_eq!(reaper.sweep().await.unwrap(), vec![RecordKey::new("R1", "Gi0")]);

    // A record refreshed since it was read is not deleted.
    store
        .apply("R1", ResourceKind::Neighbor, vec![nbr("Gi0", 3)])
        .await
        .unwrap();
    assert!(!store
        .remove_if_observed_at(ResourceKind::Neighbor, &RecordKey::new("R1", "Gi0"), 1)
        .await
        .unwrap());
    assert_eq!(store.device_records("R1", ResourceKind::Neighbor).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reaper_stops_when_change_channel_closes() {
    let store = Arc::new(MemoryStore::new());
    let (events_tx, events_rx) = events::channel(8);
    drop(events_rx);
    store
        .apply("R1", ResourceKind::Neighbor, vec![nbr("Gi0", 1)])
        .await
        .unwrap();

    let reaper = Reaper::new("R1", Arc::clone(&store), events_tx, Duration::from_secs(5));
    // Evicts at t=10s, fails to report it, and returns without being cancelled.
    reaper.run(CancellationToken::new()).await;
    assert!(store.device_records("R1", ResourceKind::Neighbor).await.unwrap().is_empty());
}

/// Known weak point of the unchanged-timestamp rule: a device that is still
/// up but repeats its message timestamp across a poll loses the neighbor
/// until its next message puts it back.
#[tokio::test]
async fn test_repeated_device_timestamp_evicts_live_neighbor() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(ChannelTransport::new());
    let tx = transport.sender("R1", ResourceKind::Neighbor);
    let (events_tx, mut events_rx) = events::channel(8);

    let cancel = CancellationToken::new();
    let collector = Collector::new(
        Arc::new(device("R1")),
        ResourceKind::Neighbor,
        Arc::clone(&store),
        Arc::clone(&transport),
        events_tx.clone(),
    );
    let run = tokio::spawn(collector.run(cancel.clone()));
    let mut reaper = Reaper::new("R1", Arc::clone(&store), events_tx, Duration::from_secs(5));

    tx.send(Ok(neighbor_message("R1", 7, &[("Gi0", "10.0.0.2")]))).await.unwrap();
    assert_eq!(next_event(&mut events_rx).await.unwrap().kind, ChangeKind::Neighbor);
    assert!(reaper.sweep().await.unwrap().is_empty());

    // Same report, same device timestamp: a refresh the rule cannot see.
    let outcome = store
        .apply("R1", ResourceKind::Neighbor, vec![nbr("Gi0", 7)])
        .await
        .unwrap();
    assert!(!outcome.changed());
    assert_eq!(outcome.refreshed, 1);
    assert_eq!(reaper.sweep().await.unwrap(), vec![RecordKey::new("R1", "Gi0")]);
    assert!(store.device_records("R1", ResourceKind::Neighbor).await.unwrap().is_empty());

    // The next message re-inserts it and reports the change.
    tx.send(Ok(neighbor_message("R1", 7, &[("Gi0", "10.0.0.2")]))).await.unwrap();
    let event = next_event(&mut events_rx).await.unwrap();
    assert_eq!(event.kind, ChangeKind::Neighbor);
    assert_eq!(event.records.len(), 1);
    assert_eq!(event.records[0].key(), RecordKey::new("R1", "Gi0"));

    cancel.cancel();
    run.await.unwrap();
}
