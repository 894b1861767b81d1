//! Shared fixtures for the integration tests: encoded telemetry messages,
//! device descriptors and a store whose writes can be made to fail.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use prost::Message;

use lib_topology::core::{ChangeEvent, EventReceiver};
use lib_topology::store::{ApplyOutcome, MemoryStore, StateStore};
use lib_topology::telemetry::proto_handler::{
    FibShInt, IsisNbrIpv4Data, IsisShNbr, IsisShNbrAfData, Telemetry, TelemetryGpbTable,
    TelemetryRowGpb,
};
use lib_topology::{Credentials, DeviceDescriptor, Record, RecordKey, ResourceKind, StoreError};

pub fn device(name: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        name: name.to_string(),
        address: "192.0.2.1".to_string(),
        port: 57400,
        credentials: Credentials {
            username: "admin".to_string(),
            password: "admin".to_string(),
        },
        certificate: None,
    }
}

fn envelope(kind: ResourceKind, node: &str, ts: u64, contents: Vec<Vec<u8>>) -> Bytes {
    let msg = Telemetry {
        node_id_str: node.to_string(),
        subscription_id_str: kind.subscription_id().to_string(),
        msg_timestamp: ts,
        data_gpb: Some(TelemetryGpbTable {
            row: contents
                .into_iter()
                .map(|content| TelemetryRowGpb {
                    timestamp: ts,
                    content,
                    ..Default::default()
                })
                .collect(),
        }),
        ..Default::default()
    };
    Bytes::from(msg.encode_to_vec())
}

/// An interface telemetry message carrying `(interface, address)` rows.
pub fn interface_message(node: &str, ts: u64, rows: &[(&str, &str)]) -> Bytes {
    let contents = rows
        .iter()
        .map(|(name, ip)| {
            FibShInt {
                per_interface: name.to_string(),
                primary_ipv4_address: ip.to_string(),
            }
            .encode_to_vec()
        })
        .collect();
    envelope(ResourceKind::Interface, node, ts, contents)
}

/// A neighbor telemetry message carrying `(local interface, neighbor address)` rows.
pub fn neighbor_message(node: &str, ts: u64, rows: &[(&str, &str)]) -> Bytes {
    let contents = rows
        .iter()
        .map(|(local, ip)| {
            IsisShNbr {
                local_interface: local.to_string(),
                neighbor_per_address_family_data: vec![IsisShNbrAfData {
                    af_name: "ipv4".to_string(),
                    ipv4: Some(IsisNbrIpv4Data {
                        interface_addresses: vec![ip.to_string()],
                    }),
                }],
            }
            .encode_to_vec()
        })
        .collect();
    envelope(ResourceKind::Neighbor, node, ts, contents)
}

/// Waits up to one second for the next change event.
pub async fn next_event(rx: &mut EventReceiver) -> Option<ChangeEvent> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.ok().flatten()
}

/// Drains every event already queued.
pub fn drain_events(rx: &mut EventReceiver) -> Vec<ChangeEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// A [`MemoryStore`] whose `apply` can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl StateStore for FlakyStore {
    async fn apply(
        &self,
        device: &str,
        kind: ResourceKind,
        records: Vec<Record>,
    ) -> Result<ApplyOutcome, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store offline".to_string()));
        }
        self.inner.apply(device, kind, records).await
    }

    async fn records(&self, kind: ResourceKind) -> Result<Vec<Record>, StoreError> {
        self.inner.records(kind).await
    }

    async fn device_records(&self, device: &str, kind: ResourceKind) -> Result<Vec<Record>, StoreError> {
        self.inner.device_records(device, kind).await
    }

    async fn remove_if_observed_at(
        &self,
        kind: ResourceKind,
        key: &RecordKey,
        observed_at: u64,
    ) -> Result<bool, StoreError> {
        self.inner.remove_if_observed_at(kind, key, observed_at).await
    }

    async fn clear_device(&self, device: &str) -> Result<usize, StoreError> {
        self.inner.clear_device(device).await
    }
}
