//! Read-through cache of successful GET responses.

use crate::key::ResourceKey;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// The last known-good body for a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Normalized resource identity.
    pub key: ResourceKey,
    /// Body of the most recent successful GET.
    pub value: Value,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
}

/// In-memory map from resource identity to last known-good body.
///
/// Entries are ordered by key so that subtree eviction is a single range
/// scan. Writes are last-write-wins; there is no merging.
///
/// The store is not persisted. It is rebuilt by live traffic and warm-up.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: RwLock<BTreeMap<ResourceKey, CacheEntry>>,
}

impl CacheStore {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `key`, if any.
    pub fn get(&self, key: &ResourceKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Stores `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: ResourceKey, value: Value) {
        self.set_at(key, value, Utc::now());
    }

    /// Stores `value` with an explicit timestamp.
    pub fn set_at(&self, key: ResourceKey, value: Value, stored_at: DateTime<Utc>) {
        let entry = CacheEntry {
            key: key.clone(),
            value,
            stored_at,
        };
        self.entries.write().insert(key, entry);
    }

    /// Removes every entry in the subtree rooted at `prefix`.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_prefix(&self, prefix: &ResourceKey) -> usize {
        let mut entries = self.entries.write();
        let start = prefix.path_key();
        let doomed: Vec<ResourceKey> = entries
            .range(start..)
            .take_while(|(key, _)| key.is_within(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            entries.remove(key);
        }
        doomed.len()
    }

    /// Removes every entry. Returns the number removed.
    pub fn clear_all(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Removes entries older than `ttl`. Returns the number removed.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        self.sweep_expired_at(Utc::now(), ttl)
    }

    /// Removes entries older than `ttl` relative to `now`.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.stored_at <= ttl);
        before - entries.len()
    }

    /// Returns all cached keys in order.
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.entries.read().keys().cloned().collect()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
