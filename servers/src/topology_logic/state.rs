use lib_topology::core::{BroadcastHub, Supervisor};
use lib_topology::store::{ApplyOutcome, MemoryStore, PostgresStore, StateStore};
use lib_topology::transport::WsRelayTransport;
use lib_topology::{Record, RecordKey, ResourceKind, StoreError};
use std::sync::Arc;

/// The store backend picked at startup.
pub enum AnyStore {
    Memory(MemoryStore),
    Postgres(PostgresStore),
}

impl AnyStore {
    pub fn backend(&self) -> &'static str {
        match self {
            AnyStore::Memory(_) => "memory",
            AnyStore::Postgres(_) => "postgres",
        }
    }
}

impl StateStore for AnyStore {
    async fn apply(
        &self,
        device: &str,
        kind: ResourceKind,
        records: Vec<Record>,
    ) -> Result<ApplyOutcome, StoreError> {
        match self {
            AnyStore::Memory(s) => s.apply(device, kind, records).await,
            AnyStore::Postgres(s) => s.apply(device, kind, records).await,
        }
    }

    async fn records(&self, kind: ResourceKind) -> Result<Vec<Record>, StoreError> {
        match self {
            AnyStore::Memory(s) => s.records(kind).await,
            AnyStore::Postgres(s) => s.records(kind).await,
        }
    }

    async fn device_records(&self, device: &str, kind: ResourceKind) -> Result<Vec<Record>, StoreError> {
        match self {
            AnyStore::Memory(s) => s.device_records(device, kind).await,
            AnyStore::Postgres(s) => s.device_records(device, kind).await,
        }
    }

    async fn remove_if_observed_at(
        &self,
        kind: ResourceKind,
        key: &RecordKey,
        observed_at: u64,
    ) -> Result<bool, StoreError> {
        match self {
            AnyStore::Memory(s) => s.remove_if_observed_at(kind, key, observed_at).await,
            AnyStore::Postgres(s) => s.remove_if_observed_at(kind, key, observed_at).await,
        }
    }

    async fn clear_device(&self, device: &str) -> Result<usize, StoreError> {
        match self {
            AnyStore::Memory(s) => s.clear_device(device).await,
            AnyStore::Postgres(s) => s.clear_device(device).await,
        }
    }
}

pub type TopologyHub = BroadcastHub<AnyStore>;
pub type TopologySupervisor = Supervisor<AnyStore, WsRelayTransport>;

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AnyStore>,
    pub hub: Arc<TopologyHub>,
    pub supervisor: Arc<TopologySupervisor>,
}

impl AppState {
    pub fn new(store: Arc<AnyStore>, hub: Arc<TopologyHub>, supervisor: Arc<TopologySupervisor>) -> Self {
        Self { store, hub, supervisor }
    }
}
