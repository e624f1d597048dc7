//! In-memory key-value store for testing.

use crate::backend::{validate_key, KvStore};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory key-value store.
///
/// This store keeps all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Engines that do not need to survive a restart
///
/// The store can be switched to an unavailable mode in which every
/// operation fails, for exercising persistence-failure handling.
///
/// # Example
///
/// ```rust
/// use offsync_storage::{KvStore, InMemoryStore};
///
/// let store = InMemoryStore::new();
/// store.set("key", b"value").unwrap();
/// assert!(store.remove("key").unwrap());
/// assert_eq!(store.get("key").unwrap(), None);
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    available: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing entries.
    ///
    /// Useful for testing restart scenarios.
    #[must_use]
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        let store = Self::default();
        {
            let mut data = store.data.write();
            for (key, value) in entries {
                data.insert(key.into(), value);
            }
        }
        store
    }

    /// Makes every subsequent operation succeed (`true`) or fail with
    /// [`StorageError::Unavailable`] (`false`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn check(&self, key: Option<&str>) -> StorageResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable);
        }
        match key {
            Some(key) => validate_key(key),
            None => Ok(()),
        }
    }
}

impl KvStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.check(Some(key))?;
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.check(Some(key))?;
        self.data.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        self.check(Some(key))?;
        Ok(self.data.write().remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.check(None)?;
        Ok(self.data.read().keys().cloned().collect())
    }

    fn flush(&self) -> StorageResult<()> {
        // Nothing is buffered
        self.check(None)
    }
}
