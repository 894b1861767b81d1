//! Change notifications flowing from collectors and reapers to the hub.

use std::fmt;

use tokio::sync::mpsc;

use crate::model::{Record, RecordKey, ResourceKind};

/// Which part of the state a [`ChangeEvent`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Interface,
    Neighbor,
    /// Not tied to one kind: reaper evictions, device removal.
    Generic,
}

impl From<ResourceKind> for ChangeKind {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Interface => ChangeKind::Interface,
            ResourceKind::Neighbor => ChangeKind::Neighbor,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Interface => f.write_str("interface"),
            ChangeKind::Neighbor => f.write_str("neighbor"),
            ChangeKind::Generic => f.write_str("generic"),
        }
    }
}

/// Something material changed in the store. Consumed once by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub device: String,
    pub kind: ChangeKind,
    /// Records inserted or modified by the change.
    pub records: Vec<Record>,
    /// Keys removed by the change.
    pub removed: Vec<RecordKey>,
}

impl ChangeEvent {
    /// A change with no record detail, e.g. a device leaving.
    pub fn generic(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            kind: ChangeKind::Generic,
            records: Vec::new(),
            removed: Vec::new(),
        }
    }
}

pub type EventSender = mpsc::Sender<ChangeEvent>;
pub type EventReceiver = mpsc::Receiver<ChangeEvent>;

/// Creates the bounded change channel shared by every producer and the hub.
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}
