//! # In-Memory State Store
//!
//! Both tables live in ordered maps behind a single `std::sync::Mutex`. The
//! lock is taken once per operation and never held across an `.await`, so
//! each call is atomic with respect to every other call.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::StoreError;
use crate::model::{Record, RecordKey, ResourceKind};
use crate::store::{scoped, ApplyOutcome, ChangeSet, StateStore};

type Table = BTreeMap<RecordKey, Record>;

#[derive(Debug, Default)]
struct Tables {
    interfaces: Table,
    neighbors: Table,
}

impl Tables {
    fn table(&self, kind: ResourceKind) -> &Table {
        match kind {
            ResourceKind::Interface => &self.interfaces,
            ResourceKind::Neighbor => &self.neighbors,
        }
    }

    fn table_mut(&mut self, kind: ResourceKind) -> &mut Table {
        match kind {
            ResourceKind::Interface => &mut self.interfaces,
            ResourceKind::Neighbor => &mut self.neighbors,
        }
    }
}

/// Iterates the records of one device. Keys sort by device first, so they
/// form one contiguous range starting at `(device, "")`.
fn device_range<'a>(table: &'a Table, device: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
    table
        .range((Bound::Included(RecordKey::new(device, "")), Bound::Unbounded))
        .take_while(move |(key, _)| key.device == device)
        .map(|(_, record)| record)
}

/// Process-local [`StateStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl StateStore for MemoryStore {
    async fn apply(
        &self,
        device: &str,
        kind: ResourceKind,
        records: Vec<Record>,
    ) -> Result<ApplyOutcome, StoreError> {
        let records = scoped(device, kind, records);
        let mut tables = self.lock()?;
        let table = tables.table_mut(kind);

        let set = ChangeSet::compute(device_range(table, device), records);
        for key in &set.removed {
            table.remove(key);
        }
        for record in &set.upserts {
            table.insert(record.key(), record.clone());
        }
        drop(tables);

        debug!(
            device,
            %kind,
            inserted = set.inserted.len(),
            modified = set.modified.len(),
            refreshed = set.refreshed.len(),
            removed = set.removed.len(),
            "applied message"
        );
        Ok(set.into_outcome())
    }

    async fn records(&self, kind: ResourceKind) -> Result<Vec<Record>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.table(kind).values().cloned().collect())
    }

    async fn device_records(&self, device: &str, kind: ResourceKind) -> Result<Vec<Record>, StoreError> {
        let tables = self.lock()?;
        Ok(device_range(tables.table(kind), device).cloned().collect())
    }

    async fn remove_if_observed_at(
        &self,
        kind: ResourceKind,
        key: &RecordKey,
        observed_at: u64,
    ) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        let table = tables.table_mut(kind);
        match table.get(key) {
            Some(record) if record.observed_at() == observed_at => {
                table.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_device(&self, device: &str) -> Result<usize, StoreError> {
        let mut tables = self.lock()?;
        let mut removed = 0;
        for kind in ResourceKind::ALL {
            let table = tables.table_mut(kind);
            let before = table.len();
            table.retain(|key, _| key.device != device);
            removed += before - table.len();
        }
        Ok(removed)
    }
}
