//! Device table keyed by root-device identity.
//!
//! Every read and write goes through a single lock. Callers receive clones,
//! so no guard ever escapes this module and nothing is held across `.await`
//! or while events are delivered.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::device::DeviceRecord;

/// Concurrency-safe mapping from identity to [`DeviceRecord`].
#[derive(Default)]
pub struct DeviceTable {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, identity: &str) -> Option<DeviceRecord> {
        self.devices.read().get(identity).cloned()
    }

    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.devices.read().contains_key(identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Inserts or replaces a record under its identity (last write wins).
    pub fn upsert(&self, record: DeviceRecord) {
        self.devices.write().insert(record.identity.clone(), record);
    }

    /// Inserts `record` unless its identity is already present, in which case
    /// the existing entry is refreshed instead. Returns the stored record.
    pub fn insert_or_refresh(&self, record: DeviceRecord) -> DeviceRecord {
        let mut devices = self.devices.write();
        match devices.get_mut(&record.identity) {
            Some(existing) => {
                existing.last_seen = record.last_seen;
                existing.cache_control = record.cache_control;
                if existing.description.is_none() {
                    existing.description = record.description;
                }
                existing.clone()
            }
            None => {
                devices.insert(record.identity.clone(), record.clone());
                record
            }
        }
    }

    /// Refreshes `last_seen` and `cache_control` of an existing record.
    ///
    /// Returns the refreshed snapshot, or `None` if the identity is unknown.
    pub fn touch(&self, identity: &str, now_ms: u64, cache_control: u64) -> Option<DeviceRecord> {
        let mut devices = self.devices.write();
        let record = devices.get_mut(identity)?;
        record.last_seen = now_ms;
        record.cache_control = cache_control;
        Some(record.clone())
    }

    /// Removes an identity. Removing an absent identity is a no-op.
    pub fn remove(&self, identity: &str) -> Option<DeviceRecord> {
        self.devices.write().remove(identity)
    }

    /// Removes and returns every record whose lifetime elapsed before `now_ms`.
    pub fn remove_expired(&self, now_ms: u64) -> Vec<DeviceRecord> {
        let mut devices = self.devices.write();
        let expired: Vec<String> = devices
            .iter()
            .filter(|(_, r)| r.is_expired(now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .iter()
            .filter_map(|key| devices.remove(key))
            .collect()
    }

    /// Returns a copy of all records, sorted by identity.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self.devices.read().values().cloned().collect();
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        records
    }
}
