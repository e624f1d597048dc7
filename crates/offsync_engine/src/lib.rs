//! # offsync Engine
//!
//! Connectivity-aware synchronization engine.
//!
//! This crate provides:
//! - Connectivity tracking with transition-only side effects
//! - A durable FIFO write queue with bounded head-of-line retry
//! - A read-through cache keyed by normalized resource identity
//! - Cache warm-up before connectivity is lost
//! - An engine that routes operations and drains the queue on reconnect
//! - Transport abstraction with HTTP and mock implementations
//!
//! ## Architecture
//!
//! Every operation goes through [`SyncEngine::dispatch`]:
//! 1. Online: execute via the transport, then cache (GET) or invalidate
//!    (writes) on success
//! 2. Offline, or after a network failure: serve GETs from the cache and
//!    queue writes
//! 3. On reconnect: a single background worker drains the queue in order
//!
//! ## Key Invariants
//!
//! - Queue order is admission order; a failing write is retried at the head
//! - A write is dropped only after exhausting its attempts, and the drop
//!   is reported exactly once
//! - Redundant connectivity reports have no side effects
//! - At most one warm-up and one drain run at a time
//! - The cache is never persisted; the queue and timestamps always are

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod connectivity;
mod engine;
mod error;
mod events;
mod http;
mod key;
mod persist;
mod queue;
mod transport;
mod warmup;

pub use cache::{CacheEntry, CacheStore};
pub use config::{RetryConfig, SyncConfig, DEFAULT_ESSENTIAL_RESOURCES, DEFAULT_TRANSIENT_PARAMS};
pub use connectivity::{ConnectivityMonitor, ConnectivityState, Transition};
pub use engine::{Dispatched, DrainReport, DrainStop, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use events::{Accepted, Completion, SyncEvent};
pub use http::{HttpClient, HttpReply, HttpTransport};
pub use key::ResourceKey;
pub use persist::{
    StatePersistence, LAST_SYNCED_KEY, LAST_WARM_UP_KEY, QUEUE_CORRUPT_PREFIX, QUEUE_KEY,
};
pub use queue::{OperationId, QueuedOperation, RetryOutcome, WriteQueue};
pub use transport::{
    Method, MockReply, MockTransport, Request, Response, Transport, WriteMethod,
    OFFLINE_UNAVAILABLE, STATUS_ACCEPTED_PENDING, STATUS_OFFLINE_UNAVAILABLE,
};
pub use warmup::{WarmUpOutcome, WarmUpReport, WarmUpService};
