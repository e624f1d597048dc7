//! Durable FIFO queue of pending write operations.
//!
//! The head of the queue is the next operation to deliver. Every mutation
//! rewrites the persisted snapshot while the queue lock is held, so the
//! durable copy never reflects an older state than the one in memory.

use crate::error::{SyncError, SyncResult};
use crate::persist::StatePersistence;
use crate::transport::{Request, WriteMethod};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier of a queued operation.
///
/// Identifiers are UUIDv7, so they sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generates a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A write captured while it could not be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Unique identifier.
    pub id: OperationId,
    /// Logical resource address.
    pub target: String,
    /// Mutating method.
    pub method: WriteMethod,
    /// JSON body, if any.
    #[serde(default)]
    pub body: Option<Value>,
    /// When the operation was admitted.
    pub enqueued_at: DateTime<Utc>,
    /// Failed executions so far.
    #[serde(default)]
    pub attempts: u32,
}

impl QueuedOperation {
    /// Creates a fresh operation with no failed attempts.
    pub fn new(method: WriteMethod, target: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            id: OperationId::new(),
            target: target.into(),
            method,
            body,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }

    /// Builds the request that delivers this operation.
    pub fn to_request(&self) -> Request {
        Request::new(self.method.into(), self.target.clone(), self.body.clone())
    }
}

/// Result of recording a failed execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// The operation is back at the head with this attempt count.
    Requeued {
        /// Failed executions so far.
        attempts: u32,
    },
    /// The attempt budget is spent; the operation has been dropped.
    Exhausted(QueuedOperation),
}

/// FIFO queue of pending writes, persisted on every mutation.
#[derive(Debug)]
pub struct WriteQueue {
    ops: Mutex<VecDeque<QueuedOperation>>,
    persistence: Arc<StatePersistence>,
    max_attempts: u32,
}

impl WriteQueue {
    /// Creates an empty queue.
    pub fn new(persistence: Arc<StatePersistence>, max_attempts: u32) -> Self {
        Self {
            ops: Mutex::new(VecDeque::new()),
            persistence,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Creates a queue holding the persisted snapshot, in persisted order.
    pub fn restore(persistence: Arc<StatePersistence>, max_attempts: u32) -> Self {
        let ops: VecDeque<_> = persistence.load_queue().into();
        Self {
            ops: Mutex::new(ops),
            persistence,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Returns the attempt budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Appends a new operation at the tail.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTarget`] for an empty address.
    pub fn enqueue(
        &self,
        method: WriteMethod,
        target: impl Into<String>,
        body: Option<Value>,
    ) -> SyncResult<QueuedOperation> {
        let op = QueuedOperation::new(method, target, body);
        self.push(op.clone())?;
        Ok(op)
    }

    /// Appends an already-built operation at the tail.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTarget`] for an empty address.
    pub fn push(&self, op: QueuedOperation) -> SyncResult<()> {
        if op.target.trim().is_empty() {
            return Err(SyncError::InvalidTarget(op.target));
        }

        let mut ops = self.ops.lock();
        ops.push_back(op);
        self.persist(&ops);
        Ok(())
    }

    /// Returns a copy of the head without removing it.
    pub fn peek_head(&self) -> Option<QueuedOperation> {
        self.ops.lock().front().cloned()
    }

    /// Removes and returns the head.
    pub fn dequeue_head(&self) -> Option<QueuedOperation> {
        let mut ops = self.ops.lock();
        let head = ops.pop_front();
        if head.is_some() {
            self.persist(&ops);
        }
        head
    }

    /// Records a failed execution of `op` and puts it back at the head.
    ///
    /// Any entry with the same id is replaced. Once the incremented count
    /// reaches the attempt budget the operation is dropped instead.
    pub fn requeue_with_increment(&self, op: QueuedOperation) -> RetryOutcome {
        let mut ops = self.ops.lock();
        ops.retain(|queued| queued.id != op.id);
        self.record_failure(&mut ops, op)
    }

    /// Like [`requeue_with_increment`](Self::requeue_with_increment), but
    /// only if `op` is still queued.
    ///
    /// Returns `None` when the operation was removed while it was in flight.
    pub fn requeue_if_present(&self, op: QueuedOperation) -> Option<RetryOutcome> {
        let mut ops = self.ops.lock();
        let index = ops.iter().position(|queued| queued.id == op.id)?;
        ops.remove(index);
        Some(self.record_failure(&mut ops, op))
    }

    /// Removes the operation with `id`, wherever it sits.
    pub fn remove(&self, id: &OperationId) -> Option<QueuedOperation> {
        let mut ops = self.ops.lock();
        let index = ops.iter().position(|op| &op.id == id)?;
        let removed = ops.remove(index);
        self.persist(&ops);
        removed
    }

    /// Removes every operation. Returns the number removed.
    pub fn clear(&self) -> usize {
        let mut ops = self.ops.lock();
        let count = ops.len();
        ops.clear();
        self.persist(&ops);
        count
    }

    /// Returns true if an operation with `id` is queued.
    pub fn contains(&self, id: &OperationId) -> bool {
        self.ops.lock().iter().any(|op| &op.id == id)
    }

    /// Returns the number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Returns a copy of the queue in delivery order.
    pub fn snapshot(&self) -> Vec<QueuedOperation> {
        self.ops.lock().iter().cloned().collect()
    }

    fn record_failure(
        &self,
        ops: &mut VecDeque<QueuedOperation>,
        mut op: QueuedOperation,
    ) -> RetryOutcome {
        op.attempts = op.attempts.saturating_add(1);
        let outcome = if op.attempts >= self.max_attempts {
            RetryOutcome::Exhausted(op)
        } else {
            let attempts = op.attempts;
            ops.push_front(op);
            RetryOutcome::Requeued { attempts }
        };
        self.persist(ops);
        outcome
    }

    fn persist(&self, ops: &VecDeque<QueuedOperation>) {
        let (front, back) = ops.as_slices();
        if back.is_empty() {
            self.persistence.save_queue(front);
        } else {
            let all: Vec<QueuedOperation> = ops.iter().cloned().collect();
            self.persistence.save_queue(&all);
        }
    }
}
