//! Connectivity oracle: the current reachability of the remote API.
//!
//! The oracle is fed from outside (health probes, OS network events). It only
//! notifies subscribers on real transitions, so a repeated "online" report
//! never fires a second "became reachable" event.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Connectivity state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// Online and connected to the API.
    Online,
    /// Offline (network unreachable or API unavailable).
    Offline,
}

/// Source of truth for "can we talk to the server right now".
pub trait ConnectivityOracle: Send + Sync {
    /// Whether the remote is believed reachable now.
    fn is_reachable(&self) -> bool;

    /// Subscribe to transitions.
    fn subscribe(&self) -> watch::Receiver<ConnectivityState>;
}

/// Offline mode state, shared by the gateway, reconciler and worker.
#[derive(Debug)]
pub struct OfflineMode {
    state: watch::Sender<ConnectivityState>,
}

impl OfflineMode {
    pub fn new(initial: ConnectivityState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Record a new state. Returns `true` if this was a transition.
    pub fn set(&self, next: ConnectivityState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::info!(state = ?next, "connectivity changed");
        }
        changed
    }

    /// Mark the client as online.
    pub fn set_online(&self) -> bool {
        self.set(ConnectivityState::Online)
    }

    /// Mark the client as offline.
    pub fn set_offline(&self) -> bool {
        self.set(ConnectivityState::Offline)
    }

    pub fn is_offline(&self) -> bool {
        self.state() == ConnectivityState::Offline
    }
}

impl Default for OfflineMode {
    fn default() -> Self {
        Self::new(ConnectivityState::Online)
    }
}

impl ConnectivityOracle for OfflineMode {
    fn is_reachable(&self) -> bool {
        !self.is_offline()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }
}
