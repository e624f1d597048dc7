//! Engine events and per-operation completion handles.

use crate::key::ResourceKey;
use crate::queue::OperationId;
use crate::transport::Response;
use crate::warmup::WarmUpReport;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Final fate of a queued write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Delivered with a 2xx status.
    Completed {
        /// Operation identifier.
        id: OperationId,
        /// Status returned by the server.
        status: u16,
    },
    /// Dropped after exhausting its attempts.
    Failed {
        /// Operation identifier.
        id: OperationId,
        /// Failed executions.
        attempts: u32,
        /// Description of the last failure.
        reason: String,
    },
}

impl Completion {
    /// Returns the operation identifier.
    pub fn id(&self) -> OperationId {
        match self {
            Completion::Completed { id, .. } | Completion::Failed { id, .. } => *id,
        }
    }

    /// Returns true for a successful delivery.
    pub fn is_completed(&self) -> bool {
        matches!(self, Completion::Completed { .. })
    }
}

/// Observable engine events.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connectivity changed.
    Connectivity {
        /// New value.
        online: bool,
    },
    /// A queued write reached its final state.
    Operation(Completion),
    /// A successful write evicted a cache subtree.
    Invalidated {
        /// Root of the evicted subtree.
        scope: ResourceKey,
        /// Entries removed.
        evicted: usize,
    },
    /// A drain emptied the write queue.
    Drained {
        /// Completion time, also recorded as `last_synced_at`.
        at: DateTime<Utc>,
    },
    /// A warm-up completed.
    WarmUp(WarmUpReport),
}

/// Handle returned when a write is admitted to the queue.
#[derive(Debug)]
pub struct Accepted {
    id: OperationId,
    completion: oneshot::Receiver<Completion>,
}

impl Accepted {
    pub(crate) fn new(id: OperationId, completion: oneshot::Receiver<Completion>) -> Self {
        Self { id, completion }
    }

    /// Returns the queued operation's identifier.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Returns the synthesized 202 response handed to the caller.
    pub fn response(&self) -> Response {
        Response::accepted_pending(self.id)
    }

    /// Waits for the operation's final state.
    ///
    /// Returns `None` if the operation was removed from the queue or the
    /// engine shut down before it was resolved.
    pub async fn completion(self) -> Option<Completion> {
        self.completion.await.ok()
    }
}

/// Maps queued operations to the callers waiting on them.
#[derive(Debug, Default)]
pub(crate) struct CompletionRegistry {
    waiters: Mutex<HashMap<OperationId, oneshot::Sender<Completion>>>,
}

impl CompletionRegistry {
    pub(crate) fn register(&self, id: OperationId) -> oneshot::Receiver<Completion> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);
        rx
    }

    pub(crate) fn resolve(&self, completion: Completion) {
        if let Some(tx) = self.waiters.lock().remove(&completion.id()) {
            let _ = tx.send(completion);
        }
    }

    /// Drops the waiter for `id`; its receiver observes `None`.
    pub(crate) fn forget(&self, id: &OperationId) {
        self.waiters.lock().remove(id);
    }

    pub(crate) fn forget_all(&self) {
        self.waiters.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_to_waiter() {
        let registry = CompletionRegistry::default();
        let id = OperationId::new();
        let accepted = Accepted::new(id, registry.register(id));

        registry.resolve(Completion::Completed { id, status: 201 });
        let completion = accepted.completion().await.unwrap();
        assert!(completion.is_completed());
        assert_eq!(completion.id(), id);
    }

    #[tokio::test]
    async fn forget_yields_none() {
        let registry = CompletionRegistry::default();
        let id = OperationId::new();
        let accepted = Accepted::new(id, registry.register(id));

        registry.forget(&id);
        assert_eq!(accepted.completion().await, None);
    }

    #[test]
    fn resolve_without_waiter_is_noop() {
        let registry = CompletionRegistry::default();
        registry.resolve(Completion::Failed {
            id: OperationId::new(),
            attempts: 3,
            reason: "status 500".into(),
        });
    }

    #[test]
    fn accepted_response_is_sentinel() {
        let registry = CompletionRegistry::default();
        let id = OperationId::new();
        let accepted = Accepted::new(id, registry.register(id));
        let response = accepted.response();
        assert_eq!(response.status, 202);
        assert_eq!(response.body["id"], serde_json::json!(id.to_string()));
    }
}
