//! # State Store
//!
//! The persisted view of current device state: two independent keyed tables,
//! one per [`ResourceKind`], holding at most one [`Record`] per
//! `(device, name)` key.
//!
//! The trait is shaped around the two writers that touch it. A collector
//! hands over a whole decoded message through [`StateStore::apply`], which
//! diffs and writes it as one atomic unit. A reaper evicts single records
//! through [`StateStore::remove_if_observed_at`], which only deletes when
//! nobody refreshed the record since it was read. Everything else is a scan.
//!
//! Backends:
//! - [`MemoryStore`]: always available, one mutex over both tables.
//! - `PostgresStore` (feature `postgres`): one transaction per message.

use std::future::Future;

use tracing::warn;

use crate::error::StoreError;
use crate::model::{Record, RecordKey, ResourceKind};

pub mod diff;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use diff::{ApplyOutcome, ChangeSet};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Keyed storage for interface and neighbor records.
///
/// Implementations must make [`apply`](StateStore::apply) atomic: a reader
/// sees either none or all of one message's effect, and a failed apply
/// leaves the device's records exactly as they were.
pub trait StateStore: Send + Sync + 'static {
    /// Applies one decoded message for `device` and `kind`.
    ///
    /// Upserts every record, never moving a stored timestamp backwards, and
    /// removes the device's records of this kind that the message did not
    /// mention.
    fn apply(
        &self,
        device: &str,
        kind: ResourceKind,
        records: Vec<Record>,
    ) -> impl Future<Output = Result<ApplyOutcome, StoreError>> + Send;

    /// Every record of `kind`, ordered by key.
    fn records(
        &self,
        kind: ResourceKind,
    ) -> impl Future<Output = Result<Vec<Record>, StoreError>> + Send;

    /// The records of `kind` belonging to `device`, ordered by key.
    fn device_records(
        &self,
        device: &str,
        kind: ResourceKind,
    ) -> impl Future<Output = Result<Vec<Record>, StoreError>> + Send;

    /// Deletes the record at `key` only if its timestamp is still `observed_at`.
    ///
    /// Returns whether a record was deleted.
    fn remove_if_observed_at(
        &self,
        kind: ResourceKind,
        key: &RecordKey,
        observed_at: u64,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Deletes every record of every kind for `device`; returns how many.
    fn clear_device(&self, device: &str) -> impl Future<Output = Result<usize, StoreError>> + Send;
}

/// Drops records that do not belong to `device` and `kind`.
///
/// The decoder never produces such records; a caller that does has a bug,
/// and writing them would let one device's message withdraw another's state.
pub(crate) fn scoped(device: &str, kind: ResourceKind, records: Vec<Record>) -> Vec<Record> {
    records
        .into_iter()
        .filter(|record| {
            let ok = record.device() == device && record.kind() == kind;
            if !ok {
                warn!(device, %kind, key = %record.key(), "ignoring record outside the applied scope");
            }
            ok
        })
        .collect()
}
