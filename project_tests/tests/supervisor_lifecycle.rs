use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lib_topology::core::{ChangeKind, Supervisor, events};
use lib_topology::store::{MemoryStore, StateStore};
use lib_topology::transport::ChannelTransport;
use lib_topology::{Record, ResourceKind, SupervisorError};
use project_tests::{device, interface_message, neighbor_message, next_event};

fn supervisor(
    store: &Arc<MemoryStore>,
    transport: &Arc<ChannelTransport>,
) -> (Supervisor<MemoryStore, ChannelTransport>, events::EventReceiver) {
    let (events_tx, events_rx) = events::channel(32);
    let supervisor = Supervisor::new(
        Arc::clone(store),
        Arc::clone(transport),
        events_tx,
        CancellationToken::new(),
        Duration::from_secs(60),
    );
    (supervisor, events_rx)
}

#[tokio::test]
async fn test_start_collect_and_stop_device() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(ChannelTransport::new());
    let interfaces = transport.sender("R1", ResourceKind::Interface);
    let neighbors = transport.sender("R1", ResourceKind::Neighbor);
    let (supervisor, mut events_rx) = supervisor(&store, &transport);

    supervisor.start(device("R1")).await.unwrap();
    assert!(matches!(
        supervisor.start(device("R1")).await,
        Err(SupervisorError::AlreadyRunning(name)) if name == "R1"
    ));

    interfaces
        .send(Ok(interface_message("R1", 1, &[("Gi0", "10.0.0.1/31")])))
        .await
        .unwrap();
    let event = next_event(&mut events_rx).await.unwrap();
    assert_eq!(event.kind, ChangeKind::Interface);

    neighbors
        .send(Ok(neighbor_message("R1", 1, &[("Gi0", "10.0.0.0")])))
        .await
        .unwrap();
    let event = next_event(&mut events_rx).await.unwrap();
    assert_eq!(event.kind, ChangeKind::Neighbor);

    let devices = supervisor.devices().await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].descriptor.name, "R1");
    assert_eq!(devices[0].active_collectors, 2);

    supervisor.stop("R1").await.unwrap();
    let event = next_event(&mut events_rx).await.unwrap();
    assert_eq!(event.kind, ChangeKind::Generic);
    assert_eq!(event.device, "R1");
    assert!(store.records(ResourceKind::Interface).await.unwrap().is_empty());
    assert!(store.records(ResourceKind::Neighbor).await.unwrap().is_empty());
    assert!(supervisor.devices().await.is_empty());

    assert!(matches!(
        supervisor.stop("R1").await,
        Err(SupervisorError::UnknownDevice(_))
    ));
}

#[tokio::test]
async fn test_start_clears_leftover_state_and_rejects_empty_name() {
    let store = Arc::new(MemoryStore::new());
    store
        .apply(
            "R2",
            ResourceKind::Interface,
            vec![Record::new(ResourceKind::Interface, "R2", "Gi0", "10.9.9.9".parse().unwrap(), 1)],
        )
        .await
        .unwrap();

    let transport = Arc::new(ChannelTransport::new());
    let (supervisor, _events_rx) = supervisor(&store, &transport);

    supervisor.start(device("R2")).await.unwrap();
    assert!(store.device_records("R2", ResourceKind::Interface).await.unwrap().is_empty());

    assert_eq!(supervisor.start(device("  ")).await, Err(SupervisorError::EmptyName));
    supervisor.shutdown().await;
    assert!(supervisor.devices().await.is_empty());
}
