//! Proactive cache fill before connectivity is lost.

use crate::cache::CacheStore;
use crate::key::ResourceKey;
use crate::persist::StatePersistence;
use crate::transport::{Method, Request, Transport};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Summary of one completed warm-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmUpReport {
    /// Resources fetched and cached.
    pub fetched: usize,
    /// Resources that could not be fetched, with the reason.
    pub failed: Vec<(String, String)>,
    /// When the warm-up finished.
    pub completed_at: DateTime<Utc>,
}

/// Result of a warm-up request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmUpOutcome {
    /// The warm-up ran to completion.
    Completed(WarmUpReport),
    /// Another warm-up was in progress; nothing was fetched.
    AlreadyRunning,
}

/// Fetches the essential resources into the cache.
///
/// At most one warm-up runs at a time. A request that arrives while one is
/// in progress returns [`WarmUpOutcome::AlreadyRunning`] immediately.
#[derive(Debug)]
pub struct WarmUpService {
    resources: Vec<String>,
    transient: Vec<String>,
    running: AtomicBool,
    last_warm_up: RwLock<Option<DateTime<Utc>>>,
}

/// Holds a running flag for its lifetime, including when the owning future
/// is cancelled mid-flight.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    /// Sets `flag`, or returns `None` if it was already set.
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl WarmUpService {
    /// Creates a service for the given resources.
    pub fn new(
        resources: Vec<String>,
        transient: Vec<String>,
        last_warm_up: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            resources,
            transient,
            running: AtomicBool::new(false),
            last_warm_up: RwLock::new(last_warm_up),
        }
    }

    /// Returns true while a warm-up is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns when the last warm-up completed.
    pub fn last_warm_up(&self) -> Option<DateTime<Utc>> {
        *self.last_warm_up.read()
    }

    /// Fetches every essential resource and caches the successful ones.
    ///
    /// Resources are fetched one after another. Individual failures are
    /// recorded in the report and do not abort the run.
    pub async fn warm_up<T>(
        &self,
        transport: &T,
        cache: &CacheStore,
        persistence: &StatePersistence,
    ) -> WarmUpOutcome
    where
        T: Transport + ?Sized,
    {
        let Some(_guard) = RunningGuard::try_acquire(&self.running) else {
            tracing::debug!("warm-up already running");
            return WarmUpOutcome::AlreadyRunning;
        };

        let mut fetched = 0;
        let mut failed = Vec::new();

        for resource in &self.resources {
            let key = match ResourceKey::parse(resource, &self.transient) {
                Ok(key) => key,
                Err(err) => {
                    failed.push((resource.clone(), err.to_string()));
                    continue;
                }
            };

            let request = Request::new(Method::Get, resource.clone(), None);
            match transport.execute(&request).await {
                Ok(response) if response.ok() => {
                    cache.set(key, response.body);
                    fetched += 1;
                }
                Ok(response) => {
                    failed.push((resource.clone(), format!("status {}", response.status)));
                }
                Err(err) => {
                    failed.push((resource.clone(), err.to_string()));
                }
            }
        }

        let completed_at = Utc::now();
        *self.last_warm_up.write() = Some(completed_at);
        persistence.set_last_warm_up(completed_at);

        tracing::info!(fetched, failed = failed.len(), "cache warm-up complete");

        WarmUpOutcome::Completed(WarmUpReport {
            fetched,
            failed,
            completed_at,
        })
    }
}
