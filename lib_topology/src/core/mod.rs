//! # Core Engine Module
//!
//! The moving parts between a device subscription and a viewer's screen:
//!
//! - **`collector`**: one task per device and kind; decodes, applies to the
//!   store atomically and emits a change event when something changed.
//! - **`reaper`**: one task per device; evicts neighbors that stopped
//!   refreshing, behind a swappable staleness policy.
//! - **`topology`**: pure store-to-graph rebuild.
//! - **`hub`**: subscriber registry with best-effort fan-out and pruning.
//! - **`supervisor`**: per-device task lifecycle with cancellation tokens.
//! - **`events`**: the change channel tying producers to the hub.

pub mod collector;
pub mod events;
pub mod hub;
pub mod reaper;
pub mod supervisor;
pub mod topology;

// --- Public API Re-exports ---
pub use collector::{now_millis, Collector, CollectorExit};
pub use events::{ChangeEvent, ChangeKind, EventReceiver, EventSender};
pub use hub::{BroadcastHub, SnapshotSink, SubscriberId};
pub use reaper::{Reaper, StalenessPolicy, UnchangedTimestampPolicy, DEFAULT_REAP_INTERVAL};
pub use supervisor::{DeviceInfo, Supervisor};
pub use topology::TopologySnapshot;
