//! Key-value store trait definition.

use crate::error::{StorageError, StorageResult};

/// A durable key-value store for offsync state.
///
/// Stores are **opaque byte maps**. The engine decides what lives under each
/// key (queue snapshots, timestamps) and how it is encoded.
///
/// # Invariants
///
/// - `get` returns exactly the bytes passed to the last successful `set`
/// - `set` replaces the whole value; values are never partially written
/// - `remove` of a missing key is not an error
/// - `flush` makes every preceding `set`/`remove` durable
/// - Stores must be `Send + Sync` and are mutated through `&self`
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes the value stored under `key`.
    ///
    /// Returns `true` if a value was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Returns all keys currently present, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the keys cannot be listed.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Flushes all pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;
}

/// Checks that a key only uses `[A-Za-z0-9._-]` and is not empty.
///
/// Keys double as file names for [`super::FileStore`], so every store
/// enforces the same alphabet.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] for empty keys, keys starting with a
/// dot, or keys with characters outside the allowed set.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_partition_names() {
        assert!(validate_key("offsync.write_queue").is_ok());
        assert!(validate_key("offsync.last-synced_at").is_ok());
    }

    #[test]
    fn rejects_unsafe_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("with space").is_err());
    }

    proptest! {
        #[test]
        fn keys_with_separators_are_rejected(prefix in "[a-z]{1,8}", suffix in "[a-z]{1,8}") {
            let key = format!("{prefix}/{suffix}");
            prop_assert!(validate_key(&key).is_err());
        }
    }
}
