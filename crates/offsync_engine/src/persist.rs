//! Durable engine state on top of a [`KvStore`].
//!
//! Three partitions are kept, each a JSON document under its own key:
//!
//! | Key                       | Contents                          |
//! |---------------------------|-----------------------------------|
//! | `offsync.write_queue`     | array of queued operations        |
//! | `offsync.last_synced_at`  | RFC 3339 timestamp string         |
//! | `offsync.last_warm_up`    | RFC 3339 timestamp string         |
//!
//! The `try_*` methods surface every failure. The plain methods used by the
//! engine log a warning and degrade to in-memory behaviour instead: a
//! missing partition loads as empty, a failed write is counted and otherwise
//! ignored.
//!
//! A queue partition that cannot be decoded is never overwritten in place.
//! Its bytes are copied under a `offsync.write_queue.corrupt-<millis>` key
//! first and the entries that still decode are kept. If the partition cannot
//! be read or copied at all, queue writes are refused for the rest of the
//! session.

use crate::error::{SyncError, SyncResult};
use crate::queue::QueuedOperation;
use chrono::{DateTime, Utc};
use offsync_storage::KvStore;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Key of the write-queue partition.
pub const QUEUE_KEY: &str = "offsync.write_queue";

/// Key prefix under which an undecodable queue partition is preserved.
pub const QUEUE_CORRUPT_PREFIX: &str = "offsync.write_queue.corrupt-";

/// Key of the last-successful-drain timestamp.
pub const LAST_SYNCED_KEY: &str = "offsync.last_synced_at";

/// Key of the last-completed-warm-up timestamp.
pub const LAST_WARM_UP_KEY: &str = "offsync.last_warm_up";

/// Reads and writes the engine's durable partitions.
pub struct StatePersistence {
    store: Arc<dyn KvStore>,
    failures: AtomicU64,
    queue_read_only: AtomicBool,
}

impl std::fmt::Debug for StatePersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePersistence")
            .field("failures", &self.failure_count())
            .field("queue_read_only", &self.queue_read_only())
            .finish_non_exhaustive()
    }
}

impl StatePersistence {
    /// Wraps a store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            failures: AtomicU64::new(0),
            queue_read_only: AtomicBool::new(false),
        }
    }

    /// Returns the number of swallowed persistence failures.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns true once queue writes are refused for this session.
    pub fn queue_read_only(&self) -> bool {
        self.queue_read_only.load(Ordering::Acquire)
    }

    /// Loads the persisted write queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the partition is corrupt.
    pub fn try_load_queue(&self) -> SyncResult<Vec<QueuedOperation>> {
        match self.store.get(QUEUE_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replaces the persisted write queue.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the store write fails.
    pub fn try_save_queue(&self, ops: &[QueuedOperation]) -> SyncResult<()> {
        let bytes = serde_json::to_vec(ops)?;
        self.store.set(QUEUE_KEY, &bytes)?;
        Ok(())
    }

    /// Loads a timestamp partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the value is not a timestamp.
    pub fn try_load_timestamp(&self, key: &str) -> SyncResult<Option<DateTime<Utc>>> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes a timestamp partition, removing it when `at` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn try_save_timestamp(&self, key: &str, at: Option<DateTime<Utc>>) -> SyncResult<()> {
        match at {
            Some(at) => self.store.set(key, &serde_json::to_vec(&at)?)?,
            None => {
                self.store.remove(key)?;
            }
        }
        Ok(())
    }

    /// Loads the write queue, keeping whatever can be recovered.
    ///
    /// Undecodable entries are dropped from the returned queue after the
    /// original bytes have been preserved. If the partition cannot be read
    /// or preserved, an empty queue is returned and later queue writes are
    /// refused so the durable copy stays intact.
    pub fn load_queue(&self) -> Vec<QueuedOperation> {
        let bytes = match self.store.get(QUEUE_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(err) => {
                self.record_failure("load write queue", &err.into());
                self.refuse_queue_writes();
                return Vec::new();
            }
        };

        let (ops, err) = decode_queue_entries(&bytes);
        let Some(err) = err else {
            return ops;
        };
        self.record_failure("load write queue", &err);

        let corrupt_key = format!("{QUEUE_CORRUPT_PREFIX}{}", Utc::now().timestamp_millis());
        match self.store.set(&corrupt_key, &bytes) {
            Ok(()) => {
                tracing::warn!(
                    key = %corrupt_key,
                    recovered = ops.len(),
                    "undecodable write queue preserved"
                );
                ops
            }
            Err(err) => {
                self.record_failure("preserve write queue", &err.into());
                self.refuse_queue_writes();
                ops
            }
        }
    }

    /// Persists the write queue. Returns false if the write was lost.
    pub fn save_queue(&self, ops: &[QueuedOperation]) -> bool {
        if self.queue_read_only() {
            tracing::debug!(pending = ops.len(), "write queue partition is read-only");
            return false;
        }
        match self.try_save_queue(ops) {
            Ok(()) => true,
            Err(err) => {
                self.record_failure("save write queue", &err);
                false
            }
        }
    }

    /// Returns the time of the last drain that emptied the queue.
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.load_timestamp(LAST_SYNCED_KEY)
    }

    /// Records the time of the last drain that emptied the queue.
    pub fn set_last_synced_at(&self, at: DateTime<Utc>) -> bool {
        self.save_timestamp(LAST_SYNCED_KEY, Some(at))
    }

    /// Returns the time of the last completed warm-up.
    pub fn last_warm_up(&self) -> Option<DateTime<Utc>> {
        self.load_timestamp(LAST_WARM_UP_KEY)
    }

    /// Records the time of the last completed warm-up.
    pub fn set_last_warm_up(&self, at: DateTime<Utc>) -> bool {
        self.save_timestamp(LAST_WARM_UP_KEY, Some(at))
    }

    /// Flushes the underlying store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be flushed.
    pub fn try_flush(&self) -> SyncResult<()> {
        self.store.flush()?;
        Ok(())
    }

    fn load_timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.try_load_timestamp(key).unwrap_or_else(|err| {
            self.record_failure(key, &err);
            None
        })
    }

    fn save_timestamp(&self, key: &str, at: Option<DateTime<Utc>>) -> bool {
        match self.try_save_timestamp(key, at) {
            Ok(()) => true,
            Err(err) => {
                self.record_failure(key, &err);
                false
            }
        }
    }

    fn refuse_queue_writes(&self) {
        if !self.queue_read_only.swap(true, Ordering::AcqRel) {
            tracing::warn!("write queue partition is read-only until restart");
        }
    }

    fn record_failure(&self, what: &str, err: &SyncError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(partition = what, error = %err, "persistence failed, continuing in memory");
    }
}

/// Decodes a queue partition entry by entry.
///
/// Returns the entries that decode, in order, and the first error met.
fn decode_queue_entries(bytes: &[u8]) -> (Vec<QueuedOperation>, Option<SyncError>) {
    let entries: Vec<serde_json::Value> = match serde_json::from_slice(bytes) {
        Ok(entries) => entries,
        Err(err) => return (Vec::new(), Some(err.into())),
    };

    let mut ops = Vec::with_capacity(entries.len());
    let mut first_err = None;
    for entry in entries {
        match serde_json::from_value(entry) {
            Ok(op) => ops.push(op),
            Err(err) => {
                first_err.get_or_insert(SyncError::from(err));
            }
        }
    }
    (ops, first_err)
}
