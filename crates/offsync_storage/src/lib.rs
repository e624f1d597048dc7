//! # offsync Storage
//!
//! Durable key-value storage backends for offsync.
//!
//! This crate provides the lowest-level persistence abstraction used by the
//! synchronization engine. Stores are **opaque byte maps** - they do not
//! interpret the values they hold.
//!
//! ## Design Principles
//!
//! - Stores are simple key-value maps (get, set, remove, flush)
//! - No knowledge of queue snapshots, timestamps, or cache entries
//! - Must be `Send + Sync` and usable through a shared reference
//! - The engine owns all value format interpretation
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral state
//! - [`FileStore`] - For persistent state in a locked directory
//!
//! ## Example
//!
//! ```rust
//! use offsync_storage::{KvStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! store.set("offsync.write_queue", b"[]").unwrap();
//! assert_eq!(store.get("offsync.write_queue").unwrap(), Some(b"[]".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_key, KvStore};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
