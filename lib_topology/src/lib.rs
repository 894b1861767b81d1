//! # lib_topology
//!
//! Telemetry ingestion, change detection and topology fan-out for network
//! devices. Devices stream interface and IS-IS neighbor state; collectors diff
//! every message against the [`store::StateStore`], reapers evict neighbors
//! whose device went quiet, and the [`core::BroadcastHub`] pushes a fresh
//! [`core::TopologySnapshot`] to every live viewer whenever something
//! material changed.
//!
//! Folder modules mirror the data path:
//!
//! - **`telemetry`**: protobuf wire types and the record decoder.
//! - **`store`**: the state store trait, its per-message diff, and backends.
//! - **`transport`**: where encoded telemetry messages come from.
//! - **`core`**: collectors, reapers, topology builder, hub and supervisor.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod core;
pub mod error;
pub mod model;
pub mod store;
pub mod telemetry;
pub mod transport;

// Re-export everything the server binary wires together.
pub use error::{DecodeError, DeliveryError, StoreError, SupervisorError, TransportError};
pub use model::{
    Credentials, DeviceDescriptor, InterfaceRecord, Ipv4Address, NeighborRecord, Record,
    RecordKey, ResourceKind,
};
