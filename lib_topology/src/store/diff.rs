//! # Per-Message Change Detection
//!
//! Given the records a device previously had for one kind and the records a
//! new message carries, works out what the store must write and whether the
//! message changed anything the topology view cares about:
//!
//! - a key seen for the first time is an insert;
//! - a known key whose address differs is a modification;
//! - a known key with the same address is only refreshed;
//! - a known key the message did not mention is withdrawn and removed.
//!
//! Backends run [`ChangeSet::compute`] while holding whatever lock or
//! transaction makes the whole message atomic, then write the result.

use std::collections::BTreeMap;

use crate::model::{Record, RecordKey};

/// Everything one message does to one device's records of one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Records to upsert, already carrying their final timestamp.
    pub upserts: Vec<Record>,
    pub inserted: Vec<RecordKey>,
    pub modified: Vec<RecordKey>,
    /// Keys whose record was only refreshed.
    pub refreshed: Vec<RecordKey>,
    pub removed: Vec<RecordKey>,
}

impl ChangeSet {
    /// Diffs `incoming` against `previous`.
    ///
    /// `previous` must hold the device's current records of the same kind.
    /// When a message repeats a key the last occurrence wins. Every
    /// observation of a known key refreshes it; see [`refreshed_at`].
    pub fn compute<'a>(
        previous: impl IntoIterator<Item = &'a Record>,
        incoming: Vec<Record>,
    ) -> ChangeSet {
        let previous: BTreeMap<RecordKey, &Record> =
            previous.into_iter().map(|r| (r.key(), r)).collect();

        let mut latest: BTreeMap<RecordKey, Record> = BTreeMap::new();
        for record in incoming {
            latest.insert(record.key(), record);
        }

        let mut set = ChangeSet::default();
        for (key, mut record) in latest.iter().map(|(k, r)| (k.clone(), r.clone())) {
            match previous.get(&key) {
                None => set.inserted.push(key),
                Some(stored) => {
                    record.set_observed_at(refreshed_at(stored.observed_at(), record.observed_at()));
                    if stored.value() != record.value() {
                        set.modified.push(key);
                    } else {
                        set.refreshed.push(key);
                    }
                }
            }
            set.upserts.push(record);
        }

        set.removed = previous
            .keys()
            .filter(|key| !latest.contains_key(*key))
            .cloned()
            .collect();

        set
    }

    /// True when the message inserted, modified or removed anything.
    pub fn changed(&self) -> bool {
        !(self.inserted.is_empty() && self.modified.is_empty() && self.removed.is_empty())
    }

    /// Summarizes the set once it has been written.
    pub fn into_outcome(self) -> ApplyOutcome {
        let mut outcome = ApplyOutcome {
            refreshed: self.refreshed.len(),
            removed: self.removed,
            ..Default::default()
        };
        for record in self.upserts {
            let key = record.key();
            if self.inserted.contains(&key) {
                outcome.inserted.push(record);
            } else if self.modified.contains(&key) {
                outcome.modified.push(record);
            }
        }
        outcome
    }
}

/// Timestamp stored for a known key observed again at `observed`.
///
/// Never below `stored`. An observation older than the stored one (device
/// clock stepped back) still moves the timestamp forward by one, so the
/// record does not look idle to the reaper. An equal timestamp is kept as is.
pub fn refreshed_at(stored: u64, observed: u64) -> u64 {
    if observed < stored {
        stored.saturating_add(1)
    } else {
        observed
    }
}

/// What one applied message did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub inserted: Vec<Record>,
    pub modified: Vec<Record>,
    pub refreshed: usize,
    pub removed: Vec<RecordKey>,
}

impl ApplyOutcome {
    /// True when the topology view may look different after this message.
    pub fn changed(&self) -> bool {
        !(self.inserted.is_empty() && self.modified.is_empty() && self.removed.is_empty())
    }

    /// Inserted and modified records, in key order.
    pub fn upserted(&self) -> Vec<Record> {
        let mut records: Vec<Record> =
            self.inserted.iter().chain(self.modified.iter()).cloned().collect();
        records.sort_by_key(Record::key);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InterfaceRecord;

    fn iface(name: &str, ip: &str, ts: u64) -> Record {
        Record::Interface(InterfaceRecord {
            device: "R1".to_string(),
            interface: name.to_string(),
            ipv4: ip.parse().unwrap(),
            observed_at: ts,
        })
    }

    #[test]
    fn test_first_message_inserts_everything() {
        let set = ChangeSet::compute(&[], vec![iface("eth0", "10.0.0.1", 1), iface("eth1", "10.0.1.1", 1)]);
        assert_eq!(set.inserted.len(), 2);
        assert!(set.changed());
        assert_eq!(set.upserts.len(), 2);
    }

    #[test]
    fn test_same_value_only_refreshes() {
        let stored = vec![iface("eth0", "10.0.0.1", 1)];
        let set = ChangeSet::compute(&stored, vec![iface("eth0", "10.0.0.1", 2)]);
        assert!(!set.changed());
        assert_eq!(set.refreshed, vec![RecordKey::new("R1", "eth0")]);
        assert_eq!(set.upserts[0].observed_at(), 2);
    }

    #[test]
    fn test_refresh_never_moves_timestamp_backwards() {
        let stored = vec![iface("eth0", "10.0.0.1", 50)];
        let set = ChangeSet::compute(&stored, vec![iface("eth0", "10.0.0.2", 10)]);
        assert_eq!(set.modified, vec![RecordKey::new("R1", "eth0")]);
        assert!(set.upserts[0].observed_at() > 50);
        assert_eq!(set.upserts[0].value().to_string(), "10.0.0.2");
    }

    #[test]
    fn test_refresh_after_clock_step_back_still_advances() {
        let stored = vec![iface("eth0", "10.0.0.1", 1_000_000)];
        let set = ChangeSet::compute(&stored, vec![iface("eth0", "10.0.0.1", 500_000)]);
        assert!(!set.changed());
        assert_eq!(set.upserts[0].observed_at(), 1_000_001);

        // Each later message of the stepped-back clock keeps advancing.
        let set = ChangeSet::compute(&set.upserts, vec![iface("eth0", "10.0.0.1", 500_100)]);
        assert_eq!(set.upserts[0].observed_at(), 1_000_002);
    }

    #[test]
    fn test_refreshed_at() {
        assert_eq!(refreshed_at(10, 20), 20);
        assert_eq!(refreshed_at(10, 10), 10);
        assert_eq!(refreshed_at(10, 3), 11);
        assert_eq!(refreshed_at(u64::MAX, 3), u64::MAX);
    }

    #[test]
    fn test_missing_key_is_withdrawn() {
        let stored = vec![iface("A", "10.0.0.1", 1), iface("B", "10.0.0.5", 1)];
        let set = ChangeSet::compute(&stored, vec![iface("A", "10.0.0.1", 2)]);
        assert_eq!(set.removed, vec![RecordKey::new("R1", "B")]);
        assert!(set.changed());
    }

    #[test]
    fn test_repeated_key_last_occurrence_wins() {
        let set = ChangeSet::compute(&[], vec![iface("A", "10.0.0.1", 1), iface("A", "10.0.0.9", 1)]);
        assert_eq!(set.upserts.len(), 1);
        assert_eq!(set.upserts[0].value().to_string(), "10.0.0.9");
    }

    #[test]
    fn test_outcome_splits_inserted_and_modified() {
        let stored = vec![iface("A", "10.0.0.1", 1), iface("B", "10.0.0.5", 1), iface("C", "10.0.0.9", 1)];
        let outcome = ChangeSet::compute(
            &stored,
            vec![iface("A", "10.0.0.1", 2), iface("B", "10.0.0.6", 2), iface("D", "10.0.0.13", 2)],
        )
        .into_outcome();
        assert_eq!(outcome.inserted.len(), 1);
        assert_eq!(outcome.modified.len(), 1);
        assert_eq!(outcome.refreshed, 1);
        assert_eq!(outcome.removed, vec![RecordKey::new("R1", "C")]);
        let names: Vec<String> = outcome.upserted().iter().map(|r| r.key().name).collect();
        assert_eq!(names, vec!["B".to_string(), "D".to_string()]);
    }
}
