//! Connectivity tracking.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot of the engine's view of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    /// Whether the remote system is believed reachable.
    pub is_online: bool,
    /// When `is_online` last changed (or when tracking started).
    pub last_transition_at: DateTime<Utc>,
    /// When a drain last emptied the write queue.
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// A connectivity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Offline to online.
    WentOnline,
    /// Online to offline.
    WentOffline,
}

impl Transition {
    /// Returns the new connectivity value.
    pub fn is_online(&self) -> bool {
        matches!(self, Transition::WentOnline)
    }
}

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Holds the current connectivity state and notifies observers of changes.
///
/// Only real transitions are reported: setting the state to its current
/// value does nothing.
pub struct ConnectivityMonitor {
    state: RwLock<ConnectivityState>,
    listeners: RwLock<Vec<Listener>>,
    watch: watch::Sender<bool>,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &*self.state.read())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl ConnectivityMonitor {
    /// Creates a monitor with an initial state.
    pub fn new(is_online: bool, last_synced_at: Option<DateTime<Utc>>) -> Self {
        let (watch, _) = watch::channel(is_online);
        Self {
            state: RwLock::new(ConnectivityState {
                is_online,
                last_transition_at: Utc::now(),
                last_synced_at,
            }),
            listeners: RwLock::new(Vec::new()),
            watch,
        }
    }

    /// Returns the current state.
    pub fn current_state(&self) -> ConnectivityState {
        *self.state.read()
    }

    /// Returns true if currently online.
    pub fn is_online(&self) -> bool {
        self.state.read().is_online
    }

    /// Registers a callback invoked with the new value on every transition.
    ///
    /// Callbacks run synchronously on the thread that reported the change.
    pub fn on_transition<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(callback));
    }

    /// Returns a receiver that observes every transition.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.watch.subscribe()
    }

    /// Reports the observed connectivity.
    ///
    /// Returns the transition, or `None` when `is_online` matches the
    /// current state.
    pub fn set_state(&self, is_online: bool) -> Option<Transition> {
        {
            let mut state = self.state.write();
            if state.is_online == is_online {
                return None;
            }
            state.is_online = is_online;
            state.last_transition_at = Utc::now();
        }

        self.watch.send_replace(is_online);
        let listeners: Vec<Listener> = self.listeners.read().clone();
        for listener in listeners {
            listener(is_online);
        }

        Some(if is_online {
            Transition::WentOnline
        } else {
            Transition::WentOffline
        })
    }

    pub(crate) fn mark_synced(&self, at: DateTime<Utc>) {
        self.state.write().last_synced_at = Some(at);
    }
}
