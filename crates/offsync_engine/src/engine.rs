//! The synchronization engine.
//!
//! [`SyncEngine`] routes every outbound operation by connectivity and
//! method:
//!
//! | State   | GET                                  | POST/PUT/PATCH/DELETE            |
//! |---------|--------------------------------------|----------------------------------|
//! | online  | transport, cache on 2xx              | transport, evict scope on 2xx    |
//! | offline | cache hit (200) or unavailable (503) | queue, accepted-pending (202)    |
//!
//! A retryable network failure while online is served through the offline
//! path for that one operation. Fatal transport errors and application
//! errors (non-2xx) are returned to the caller unmodified.
//!
//! The write queue is drained by a single background worker, the only caller
//! of the drain pass, so passes never overlap. It wakes on
//! reconnect, on writes admitted while online, on explicit
//! [`drain_now`](SyncEngine::drain_now) requests, and on its backoff timer.
//! A pass stops at the first failure so later writes never overtake an
//! earlier one.

use crate::cache::{CacheEntry, CacheStore};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState, Transition};
use crate::error::{SyncError, SyncResult};
use crate::events::{Accepted, Completion, CompletionRegistry, SyncEvent};
use crate::key::ResourceKey;
use crate::persist::StatePersistence;
use crate::queue::{OperationId, QueuedOperation, RetryOutcome, WriteQueue};
use crate::transport::{Method, Request, Response, Transport, WriteMethod};
use crate::warmup::{WarmUpOutcome, WarmUpService};
use chrono::{DateTime, Utc};
use offsync_storage::KvStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of dispatching one operation.
#[derive(Debug)]
pub enum Dispatched {
    /// The remote system answered; the response is returned unmodified.
    Live(Response),
    /// Offline GET served from the cache.
    Cached(CacheEntry),
    /// Offline GET with nothing cached.
    Unavailable,
    /// Write admitted to the queue for later delivery.
    Accepted(Accepted),
}

impl Dispatched {
    /// Returns the response handed to the caller, synthesizing sentinels
    /// for offline outcomes.
    pub fn response(&self) -> Response {
        match self {
            Dispatched::Live(response) => response.clone(),
            Dispatched::Cached(entry) => Response::ok_with(entry.value.clone()),
            Dispatched::Unavailable => Response::offline_unavailable(),
            Dispatched::Accepted(accepted) => accepted.response(),
        }
    }

    /// Returns the status of [`response`](Self::response).
    pub fn status(&self) -> u16 {
        match self {
            Dispatched::Live(response) => response.status,
            Dispatched::Cached(_) => 200,
            Dispatched::Unavailable => crate::transport::STATUS_OFFLINE_UNAVAILABLE,
            Dispatched::Accepted(_) => crate::transport::STATUS_ACCEPTED_PENDING,
        }
    }

    /// Returns true if the remote system was not reached.
    pub fn is_offline(&self) -> bool {
        !matches!(self, Dispatched::Live(_))
    }

    /// Returns the queue handle, if the write was queued.
    pub fn into_accepted(self) -> Option<Accepted> {
        match self {
            Dispatched::Accepted(accepted) => Some(accepted),
            _ => None,
        }
    }
}

/// Why a drain pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStop {
    /// The queue is empty.
    Emptied,
    /// Connectivity is offline.
    Offline,
    /// The transport reported the offline sentinel for the head operation.
    ConnectionLost,
    /// The head operation failed and awaits its retry.
    Retrying {
        /// Head operation.
        id: OperationId,
        /// Failed executions so far.
        attempts: u32,
    },
    /// The head operation was dropped, either after exhausting its attempts
    /// or on a transport error that cannot succeed on retry.
    Dropped {
        /// Dropped operation.
        id: OperationId,
    },
}

/// Summary of one drain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations delivered with a 2xx status.
    pub delivered: usize,
    /// Operations dropped after exhausting their attempts.
    pub dropped: usize,
    /// Operations still queued.
    pub remaining: usize,
    /// Why the pass ended.
    pub stop: DrainStop,
}

enum Signal {
    Reconnected,
    Enqueued,
    /// A write fell back to the queue after a transport failure.
    Deferred,
    Retry,
    Drain(oneshot::Sender<DrainReport>),
    Shutdown,
}

#[derive(Clone, Copy)]
enum Wake {
    IfOnline,
    Deferred,
}

struct Inner<T> {
    config: SyncConfig,
    transport: T,
    monitor: ConnectivityMonitor,
    queue: WriteQueue,
    cache: CacheStore,
    warmup: WarmUpService,
    persistence: Arc<StatePersistence>,
    events: broadcast::Sender<SyncEvent>,
    completions: CompletionRegistry,
    signals: mpsc::UnboundedSender<Signal>,
    closed: AtomicBool,
}

/// Connectivity-aware synchronization engine.
///
/// One engine owns one durable store. All methods take `&self`; the engine
/// can be shared behind an `Arc`.
pub struct SyncEngine<T: Transport + 'static> {
    inner: Arc<Inner<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static> SyncEngine<T> {
    /// Opens an engine over `store`, restoring the persisted write queue and
    /// timestamps, and starts the drain worker.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn open(config: SyncConfig, transport: T, store: Arc<dyn KvStore>) -> Self {
        let persistence = Arc::new(StatePersistence::new(store));
        let queue = WriteQueue::restore(Arc::clone(&persistence), config.max_attempts);
        let monitor = ConnectivityMonitor::new(config.start_online, persistence.last_synced_at());
        let warmup = WarmUpService::new(
            config.essential_resources.clone(),
            config.transient_query_params.clone(),
            persistence.last_warm_up(),
        );
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (signals, receiver) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            config,
            transport,
            monitor,
            queue,
            cache: CacheStore::new(),
            warmup,
            persistence,
            events,
            completions: CompletionRegistry::default(),
            signals,
            closed: AtomicBool::new(false),
        });

        let worker = tokio::spawn(run_worker(Arc::clone(&inner), receiver));

        let restored = inner.queue.len();
        if restored > 0 {
            info!(pending = restored, "restored write queue");
            if inner.monitor.is_online() {
                inner.signal(Signal::Enqueued);
            }
        }

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Dispatches one logical operation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTarget`] for an unparseable address,
    /// [`SyncError::Closed`] after [`close`](Self::close), and any
    /// non-retryable error raised by the transport.
    pub async fn dispatch(
        &self,
        method: Method,
        target: &str,
        body: Option<Value>,
    ) -> SyncResult<Dispatched> {
        self.inner.dispatch(method, target, body).await
    }

    /// Shorthand for a GET dispatch.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    pub async fn get(&self, target: &str) -> SyncResult<Dispatched> {
        self.dispatch(Method::Get, target, None).await
    }

    /// Admits a write directly to the queue, bypassing live execution.
    ///
    /// The worker is woken immediately when online.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTarget`] or [`SyncError::Closed`].
    pub fn enqueue(
        &self,
        method: WriteMethod,
        target: &str,
        body: Option<Value>,
    ) -> SyncResult<Accepted> {
        self.inner.admit(method, target, body, Wake::IfOnline)
    }

    /// Retracts a queued write. Its completion handle resolves to `None`.
    pub fn remove(&self, id: &OperationId) -> Option<QueuedOperation> {
        let removed = self.inner.queue.remove(id);
        self.inner.completions.forget(id);
        removed
    }

    /// Retracts every queued write. Returns the number removed.
    pub fn clear_queue(&self) -> usize {
        let removed = self.inner.queue.clear();
        self.inner.completions.forget_all();
        removed
    }

    /// Returns the queued writes in delivery order.
    pub fn pending(&self) -> Vec<QueuedOperation> {
        self.inner.queue.snapshot()
    }

    /// Returns the current connectivity snapshot.
    pub fn state(&self) -> ConnectivityState {
        self.inner.monitor.current_state()
    }

    /// Returns true if currently online.
    pub fn is_online(&self) -> bool {
        self.inner.monitor.is_online()
    }

    /// Returns the cache.
    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Reports connectivity, from the environment or a manual override.
    ///
    /// Redundant calls are no-ops. Going offline with
    /// `trigger_side_effects` starts a warm-up; going online wakes the
    /// drain worker and schedules the cache-expiry sweep.
    ///
    /// Returns true if the state changed. Must be called within a Tokio
    /// runtime.
    pub fn set_online(&self, is_online: bool, trigger_side_effects: bool) -> bool {
        self.inner.set_online(is_online, trigger_side_effects)
    }

    /// Follows an environment connectivity signal until it closes.
    ///
    /// The current value is applied immediately.
    pub fn follow_signal(&self, mut signal: watch::Receiver<bool>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let initial = *signal.borrow_and_update();
            inner.set_online(initial, true);
            while signal.changed().await.is_ok() {
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }
                let online = *signal.borrow_and_update();
                inner.set_online(online, true);
            }
        })
    }

    /// Registers a callback invoked on every connectivity transition.
    pub fn on_transition<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.monitor.on_transition(callback);
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Runs a warm-up now, unless one is already running.
    pub async fn warm_up(&self) -> WarmUpOutcome {
        self.inner.run_warm_up().await
    }

    /// Returns when the last warm-up completed.
    pub fn last_warm_up(&self) -> Option<DateTime<Utc>> {
        self.inner.warmup.last_warm_up()
    }

    /// Asks the worker for a drain pass and waits for its report.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Closed`] if the engine is closed.
    pub async fn drain_now(&self) -> SyncResult<DrainReport> {
        self.inner.ensure_open()?;
        let (reply, report) = oneshot::channel();
        self.inner.signal(Signal::Drain(reply));
        report.await.map_err(|_| SyncError::Closed)
    }

    /// Stops the worker and flushes the durable store.
    ///
    /// Queued writes stay persisted for the next [`open`](Self::open).
    /// Calling `close` twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be flushed.
    pub async fn close(&self) -> SyncResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.signal(Signal::Shutdown);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!(error = %err, "sync worker ended abnormally");
            }
        }

        self.inner.completions.forget_all();
        self.inner.persistence.try_flush()?;
        info!(pending = self.inner.queue.len(), "sync engine closed");
        Ok(())
    }
}

impl<T: Transport + 'static> Drop for SyncEngine<T> {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.signal(Signal::Shutdown);
    }
}

impl<T: Transport + 'static> Inner<T> {
    fn ensure_open(&self) -> SyncResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SyncError::Closed);
        }
        Ok(())
    }

    fn signal(&self, signal: Signal) {
        // The worker only goes away after shutdown.
        let _ = self.signals.send(signal);
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    fn set_online(self: &Arc<Self>, is_online: bool, trigger_side_effects: bool) -> bool {
        let Some(transition) = self.monitor.set_state(is_online) else {
            return false;
        };
        info!(online = is_online, "connectivity changed");
        self.emit(SyncEvent::Connectivity { online: is_online });

        match transition {
            Transition::WentOffline => {
                if trigger_side_effects {
                    let inner = Arc::clone(self);
                    tokio::spawn(async move {
                        inner.run_warm_up().await;
                    });
                }
            }
            Transition::WentOnline => {
                self.signal(Signal::Reconnected);
                if let Some(ttl) = self.config.cache_ttl {
                    let inner = Arc::clone(self);
                    let delay = self.config.sweep_delay;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let expired = inner.cache.sweep_expired(ttl);
                        debug!(expired, "post-reconnect cache sweep");
                    });
                }
            }
        }
        true
    }

    async fn dispatch(
        &self,
        method: Method,
        target: &str,
        body: Option<Value>,
    ) -> SyncResult<Dispatched> {
        self.ensure_open()?;
        let key = ResourceKey::parse(target, &self.config.transient_query_params)?;

        if self.monitor.is_online() {
            let request = Request::new(method, target, body.clone());
            match self.transport.execute(&request).await {
                Ok(response) => {
                    if response.ok() {
                        match WriteMethod::try_from(method) {
                            Ok(write) => self.invalidate(&key, write),
                            Err(_) => self.cache.set(key, response.body.clone()),
                        }
                    }
                    debug!(%method, address = target, status = response.status, "dispatched live");
                    return Ok(Dispatched::Live(response));
                }
                Err(err) if err.is_retryable() => {
                    debug!(%method, address = target, error = %err, "serving offline");
                    return self.serve_offline(method, &key, target, body, Wake::Deferred);
                }
                Err(err) => return Err(err),
            }
        }

        self.serve_offline(method, &key, target, body, Wake::IfOnline)
    }

    fn serve_offline(
        &self,
        method: Method,
        key: &ResourceKey,
        target: &str,
        body: Option<Value>,
        wake: Wake,
    ) -> SyncResult<Dispatched> {
        match WriteMethod::try_from(method) {
            Ok(write) => self.admit(write, target, body, wake).map(Dispatched::Accepted),
            Err(_) => Ok(match self.cache.get(key) {
                Some(entry) => Dispatched::Cached(entry),
                None => Dispatched::Unavailable,
            }),
        }
    }

    fn admit(
        &self,
        method: WriteMethod,
        target: &str,
        body: Option<Value>,
        wake: Wake,
    ) -> SyncResult<Accepted> {
        self.ensure_open()?;
        ResourceKey::parse(target, &self.config.transient_query_params)?;

        let op = QueuedOperation::new(method, target, body);
        let id = op.id;
        // Register before the worker can see the operation.
        let completion = self.completions.register(id);
        if let Err(err) = self.queue.push(op) {
            self.completions.forget(&id);
            return Err(err);
        }
        debug!(%id, %method, address = target, "write queued");

        match wake {
            Wake::IfOnline if self.monitor.is_online() => self.signal(Signal::Enqueued),
            Wake::IfOnline => {}
            Wake::Deferred => self.signal(Signal::Deferred),
        }
        Ok(Accepted::new(id, completion))
    }

    fn invalidate(&self, key: &ResourceKey, method: WriteMethod) {
        let scope = key.invalidation_scope(method);
        let evicted = self.cache.evict_prefix(&scope);
        debug!(%scope, evicted, "cache invalidated");
        self.emit(SyncEvent::Invalidated { scope, evicted });
    }

    async fn run_warm_up(&self) -> WarmUpOutcome {
        let outcome = self
            .warmup
            .warm_up(&self.transport, &self.cache, &self.persistence)
            .await;
        if let WarmUpOutcome::Completed(report) = &outcome {
            for (resource, reason) in &report.failed {
                warn!(resource = %resource, reason = %reason, "warm-up fetch failed");
            }
            self.emit(SyncEvent::WarmUp(report.clone()));
        }
        outcome
    }

    /// Runs one drain pass. Only the worker calls this.
    async fn drain(&self) -> DrainReport {
        let mut delivered = 0;
        let mut dropped = 0;

        let stop = loop {
            if !self.monitor.is_online() {
                break DrainStop::Offline;
            }
            let Some(op) = self.queue.peek_head() else {
                break DrainStop::Emptied;
            };

            let reason = match self.transport.execute(&op.to_request()).await {
                Ok(response) if response.ok() => {
                    self.queue.remove(&op.id);
                    self.complete(&op, response.status);
                    delivered += 1;
                    continue;
                }
                Ok(response) if response.is_offline_sentinel() => {
                    break DrainStop::ConnectionLost;
                }
                Ok(response) => format!("status {}", response.status),
                Err(err) if err.is_retryable() => err.to_string(),
                Err(err) => {
                    let Some(mut op) = self.queue.remove(&op.id) else {
                        continue;
                    };
                    op.attempts = op.attempts.saturating_add(1);
                    warn!(id = %op.id, address = %op.target, error = %err, "queued write dropped");
                    let id = op.id;
                    self.fail(op, err.to_string());
                    dropped += 1;
                    break DrainStop::Dropped { id };
                }
            };

            let id = op.id;
            match self.queue.requeue_if_present(op) {
                // Retracted while in flight.
                None => continue,
                Some(RetryOutcome::Requeued { attempts }) => {
                    debug!(%id, attempts, %reason, "queued write failed, will retry");
                    break DrainStop::Retrying { id, attempts };
                }
                Some(RetryOutcome::Exhausted(op)) => {
                    let err = SyncError::RetriesExhausted {
                        id,
                        attempts: op.attempts,
                    };
                    warn!(address = %op.target, last_failure = %reason, "{err}");
                    self.fail(op, reason);
                    dropped += 1;
                    break DrainStop::Dropped { id };
                }
            }
        };

        if stop == DrainStop::Emptied {
            let at = Utc::now();
            self.monitor.mark_synced(at);
            self.persistence.set_last_synced_at(at);
            if let Some(ttl) = self.config.cache_ttl {
                self.cache.sweep_expired(ttl);
            }
            if delivered > 0 {
                info!(delivered, "write queue drained");
            }
            self.emit(SyncEvent::Drained { at });
        }

        DrainReport {
            delivered,
            dropped,
            remaining: self.queue.len(),
            stop,
        }
    }

    fn fail(&self, op: QueuedOperation, reason: String) {
        let completion = Completion::Failed {
            id: op.id,
            attempts: op.attempts,
            reason,
        };
        self.completions.resolve(completion.clone());
        self.emit(SyncEvent::Operation(completion));
    }

    fn complete(&self, op: &QueuedOperation, status: u16) {
        match ResourceKey::parse(&op.target, &self.config.transient_query_params) {
            Ok(key) => self.invalidate(&key, op.method),
            Err(err) => debug!(id = %op.id, error = %err, "skipping invalidation"),
        }
        let completion = Completion::Completed { id: op.id, status };
        self.completions.resolve(completion.clone());
        self.emit(SyncEvent::Operation(completion));
    }
}

/// Returns the instant `delay` from now, capped at one year out.
fn retry_deadline(delay: Duration) -> Instant {
    const CEILING: Duration = Duration::from_secs(365 * 24 * 60 * 60);
    Instant::now() + delay.min(CEILING)
}

async fn run_worker<T: Transport + 'static>(
    inner: Arc<Inner<T>>,
    mut signals: mpsc::UnboundedReceiver<Signal>,
) {
    let mut retry_at: Option<Instant> = None;

    loop {
        let signal = match retry_at {
            Some(deadline) => tokio::select! {
                signal = signals.recv() => signal,
                () = tokio::time::sleep_until(deadline) => Some(Signal::Retry),
            },
            None => signals.recv().await,
        };

        let (reconnected, reply) = match signal {
            None | Some(Signal::Shutdown) => break,
            // The head is backing off; new arrivals wait behind it.
            Some(Signal::Enqueued) if retry_at.is_some() => continue,
            Some(Signal::Deferred) => {
                if retry_at.is_none() {
                    retry_at = Some(retry_deadline(inner.config.retry.delay_for_attempt(1)));
                }
                continue;
            }
            Some(Signal::Reconnected) => (true, None),
            Some(Signal::Drain(reply)) => (false, Some(reply)),
            Some(Signal::Enqueued) | Some(Signal::Retry) => (false, None),
        };

        let report = inner.drain().await;
        retry_at = match report.stop {
            DrainStop::Retrying { attempts, .. } => {
                Some(retry_deadline(inner.config.retry.delay_for_attempt(attempts)))
            }
            DrainStop::Dropped { .. } => {
                Some(retry_deadline(inner.config.retry.delay_for_attempt(1)))
            }
            _ => None,
        };

        if reconnected && report.stop == DrainStop::Emptied && inner.config.refresh_on_reconnect {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                inner.run_warm_up().await;
            });
        }

        if let Some(reply) = reply {
            let _ = reply.send(report);
        }
    }

    debug!("sync worker stopped");
}
