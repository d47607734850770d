//! Connection State Management
//!
//! Provides the connection state machine shared between a relay client
//! and its background driver.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

/// Maximum number of transitions kept in the history
const TRANSITION_HISTORY: usize = 100;

/// Represents the possible states of a relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport is open
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// Handshake completed, events flow
    Connected,
    /// The last attempt or session failed
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Error => write!(f, "Error"),
        }
    }
}

/// State transition information
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Internal state data
struct ConnectionStateInner {
    current: ConnectionState,
    last_connected: Option<DateTime<Utc>>,
    connection_attempts: u32,
    last_error: Option<String>,
    terminated: bool,
    finished: bool,
    transitions: Vec<StateTransition>,
}

/// Thread-safe connection state manager
#[derive(Clone)]
pub struct ConnectionStateManager {
    inner: Arc<RwLock<ConnectionStateInner>>,
    watch_tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionStateManager {
    /// Create a new state manager starting in Disconnected state
    pub fn new() -> Self {
        let (watch_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(RwLock::new(ConnectionStateInner {
                current: ConnectionState::Disconnected,
                last_connected: None,
                connection_attempts: 0,
                last_error: None,
                terminated: false,
                finished: false,
                transitions: Vec::new(),
            })),
            watch_tx: Arc::new(watch_tx),
        }
    }

    /// Get the current state
    pub fn current_state(&self) -> ConnectionState {
        self.inner.read().current
    }

    /// Get the last connected timestamp
    pub fn last_connected(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_connected
    }

    /// Get the number of attempts since the last successful connection
    pub fn connection_attempts(&self) -> u32 {
        self.inner.read().connection_attempts
    }

    /// Description of the most recent failure
    pub fn last_error(&self) -> Option<String> {
        self.inner.read().last_error.clone()
    }

    /// Whether the owning client has been torn down
    pub fn is_terminated(&self) -> bool {
        self.inner.read().terminated
    }

    /// Whether the driver has stopped and no further transition will come
    pub fn is_finished(&self) -> bool {
        self.inner.read().finished
    }

    /// Record that the driver stopped; wakes every watcher
    pub fn mark_finished(&self) {
        let current = {
            let mut inner = self.inner.write();
            inner.finished = true;
            inner.current
        };
        self.watch_tx.send_replace(current);
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.watch_tx.subscribe()
    }

    /// Transition to a new state
    pub fn transition_to(&self, new_state: ConnectionState, reason: Option<String>) -> bool {
        let changed = {
            let mut inner = self.inner.write();
            if inner.terminated {
                return false;
            }
            match Self::apply(&mut inner, new_state, reason) {
                Some(changed) => changed,
                None => return false,
            }
        };

        if changed {
            self.watch_tx.send_replace(new_state);
        }
        true
    }

    /// Apply a transition under the write lock; returns whether the state changed
    fn apply(
        inner: &mut ConnectionStateInner,
        new_state: ConnectionState,
        reason: Option<String>,
    ) -> Option<bool> {
        // Validate transition
        if !Self::is_valid_transition(inner.current, new_state) {
            tracing::debug!(
                from = %inner.current,
                to = %new_state,
                "Rejected connection state transition"
            );
            return None;
        }

        let old_state = inner.current;
        inner.current = new_state;

        // Update connection tracking
        match new_state {
            ConnectionState::Connected => {
                inner.last_connected = Some(Utc::now());
                inner.connection_attempts = 0;
                inner.last_error = None;
            }
            ConnectionState::Connecting => {
                inner.connection_attempts += 1;
            }
            ConnectionState::Error => {
                inner.last_error = reason.clone();
            }
            ConnectionState::Disconnected => {}
        }

        inner.transitions.push(StateTransition {
            from: old_state,
            to: new_state,
            timestamp: Utc::now(),
            reason,
        });

        if inner.transitions.len() > TRANSITION_HISTORY {
            inner.transitions.remove(0);
        }

        tracing::info!(
            from = %old_state,
            to = %new_state,
            attempts = inner.connection_attempts,
            "Relay state transition"
        );

        Some(old_state != new_state)
    }

    /// Check if a state transition is valid
    fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
        // Self-transition is always allowed
        if from == to {
            return true;
        }

        matches!(
            (from, to),
            // From Disconnected
            (ConnectionState::Disconnected, ConnectionState::Connecting) |
            (ConnectionState::Disconnected, ConnectionState::Error) |
            // From Connecting
            (ConnectionState::Connecting, ConnectionState::Connected) |
            (ConnectionState::Connecting, ConnectionState::Error) |
            (ConnectionState::Connecting, ConnectionState::Disconnected) |
            // From Connected
            (ConnectionState::Connected, ConnectionState::Disconnected) |
            (ConnectionState::Connected, ConnectionState::Error) |
            // From Error
            (ConnectionState::Error, ConnectionState::Disconnected)
        )
    }

    /// Set state to connecting
    pub fn set_connecting(&self) {
        self.transition_to(ConnectionState::Connecting, Some("Initiating connection".to_string()));
    }

    /// Set state to connected
    pub fn set_connected(&self) {
        self.transition_to(ConnectionState::Connected, Some("Connection established".to_string()));
    }

    /// Set state to disconnected
    pub fn set_disconnected(&self, reason: Option<String>) {
        self.transition_to(ConnectionState::Disconnected, reason);
    }

    /// Set state to error
    pub fn set_error(&self, reason: String) {
        self.transition_to(ConnectionState::Error, Some(reason));
    }

    /// Final transition on teardown: any state goes to Disconnected and stays there
    pub fn terminate(&self) {
        let changed = {
            let mut inner = self.inner.write();
            if inner.terminated {
                return;
            }
            let changed =
                Self::apply(&mut inner, ConnectionState::Disconnected, Some("Torn down".to_string()))
                    .unwrap_or(false);
            inner.terminated = true;
            changed
        };

        if changed {
            self.watch_tx.send_replace(ConnectionState::Disconnected);
        }
    }

    /// Get recent state transitions
    pub fn recent_transitions(&self, count: usize) -> Vec<StateTransition> {
        let inner = self.inner.read();
        inner.transitions.iter().rev().take(count).cloned().collect()
    }

    /// Check if the relay is connected
    pub fn is_connected(&self) -> bool {
        self.current_state() == ConnectionState::Connected
    }

    /// Check if a connection attempt is in flight
    pub fn is_connecting(&self) -> bool {
        self.current_state() == ConnectionState::Connecting
    }
}

impl Default for ConnectionStateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let manager = ConnectionStateManager::new();
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_valid_transitions() {
        let manager = ConnectionStateManager::new();

        // Disconnected -> Connecting
        assert!(manager.transition_to(ConnectionState::Connecting, None));
        assert!(manager.is_connecting());

        // Connecting -> Connected
        assert!(manager.transition_to(ConnectionState::Connected, None));
        assert!(manager.is_connected());

        // Connected -> Disconnected (server close)
        assert!(manager.transition_to(ConnectionState::Disconnected, None));
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_error_passes_through_disconnected() {
        let manager = ConnectionStateManager::new();
        manager.set_connecting();
        manager.set_connected();

        manager.set_error("ping timeout".to_string());
        assert_eq!(manager.current_state(), ConnectionState::Error);
        assert_eq!(manager.last_error().as_deref(), Some("ping timeout"));

        // Error -> Connecting must go through Disconnected
        assert!(!manager.transition_to(ConnectionState::Connecting, None));
        assert!(!manager.transition_to(ConnectionState::Connected, None));
        manager.set_disconnected(None);
        assert!(manager.transition_to(ConnectionState::Connecting, None));
    }

    #[test]
    fn test_connection_attempts() {
        let manager = ConnectionStateManager::new();

        manager.set_connecting();
        assert_eq!(manager.connection_attempts(), 1);

        manager.transition_to(ConnectionState::Disconnected, None);
        manager.set_connecting();
        assert_eq!(manager.connection_attempts(), 2);

        manager.set_connected();
        assert_eq!(manager.connection_attempts(), 0);
        assert!(manager.last_connected().is_some());
    }

    #[test]
    fn test_terminate_freezes_state() {
        let manager = ConnectionStateManager::new();
        manager.set_connecting();
        manager.terminate();

        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert!(manager.is_terminated());
        assert!(!manager.transition_to(ConnectionState::Connecting, None));
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_mark_finished_wakes_watchers() {
        let manager = ConnectionStateManager::new();
        let mut rx = manager.subscribe();
        rx.borrow_and_update();

        manager.mark_finished();
        assert!(manager.is_finished());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_watch_receives_changes() {
        let manager = ConnectionStateManager::new();
        let mut rx = manager.subscribe();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);

        manager.set_connecting();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);

        let transitions = manager.recent_transitions(10);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, ConnectionState::Connecting);
    }
}
