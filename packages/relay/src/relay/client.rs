//! Relay Client
//!
//! [`RelayClient`] owns exactly one relay connection. Creating it starts the
//! connection in the background; dropping it (or calling
//! [`RelayClient::teardown`]) closes the connection and silences every
//! handler. Clients are never shared: each view or command that needs
//! progress events creates its own.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::connection::driver::{Command, Driver, Shared};
use crate::connection::protocol::{EventKind, JoinPayload, ServerEvent, JOIN_EVENT};
use crate::connection::transport::{Connector, DefaultConnector};
use crate::error::RelayError;
use crate::relay::state::ConnectionState;
use crate::relay::subscriptions::SubscriptionId;

/// Extra time `close` waits on top of the driver's own shutdown timeout
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Connection lifecycle manager for one download session view
pub struct RelayClient {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl RelayClient {
    /// Start connecting to the configured endpoint.
    ///
    /// Returns immediately; must be called from within a Tokio runtime.
    pub fn initialize(config: RelayConfig) -> Self {
        Self::with_connector(config, Arc::new(DefaultConnector::new()))
    }

    /// Start connecting through a custom connector
    pub fn with_connector(config: RelayConfig, connector: Arc<dyn Connector>) -> Self {
        let shared = Arc::new(Shared::new());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let shutdown_timeout = config.endpoint.shutdown_timeout();

        let driver = Driver::new(config, connector, Arc::clone(&shared), command_rx);
        let task = tokio::spawn(driver.run(shutdown_rx));

        Self {
            shared,
            commands,
            shutdown: Some(shutdown),
            task: Some(task),
            shutdown_timeout,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state.current_state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    /// Receiver that observes every state change
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Socket.IO id of the current session, while connected
    pub fn socket_id(&self) -> Option<String> {
        self.shared.socket_id.read().clone()
    }

    /// Description of the most recent connection failure
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.last_error()
    }

    /// Number of connection attempts since the last successful connect
    pub fn connection_attempts(&self) -> u32 {
        self.shared.state.connection_attempts()
    }

    /// Whether the driver has stopped for good (server disconnect,
    /// reconnection exhausted, or teardown)
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait until the connection reaches `Connected`.
    ///
    /// Returns `false` if `wait` elapses first or the client can no longer
    /// connect (driver stopped or torn down).
    pub async fn wait_connected(&self, wait: Duration) -> bool {
        let mut changes = self.state_changes();
        let connected = async {
            loop {
                if *changes.borrow_and_update() == ConnectionState::Connected {
                    return true;
                }
                if self.shared.state.is_finished() || self.shared.state.is_terminated() {
                    return false;
                }
                if changes.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(wait, connected).await.unwrap_or(false)
    }

    /// Ask the server to scope events to `session_id`.
    ///
    /// Buffered while a connection is pending and sent once connected;
    /// dropped silently if the client can no longer connect.
    pub fn join(&self, session_id: &str) {
        let payload = JoinPayload {
            session_id: session_id.to_string(),
        };
        match serde_json::to_value(payload) {
            Ok(data) => self.emit(JOIN_EVENT, data),
            Err(e) => warn!(error = %e, "Failed to encode join payload"),
        }
    }

    /// Send an arbitrary event with a single JSON argument
    pub fn emit(&self, event: &str, data: Value) {
        let command = Command::Emit {
            event: event.to_string(),
            data,
        };
        if self.commands.send(command).is_err() {
            debug!(event = %event, "Relay is no longer connected, dropping outbound event");
        }
    }

    /// Register `handler` for every occurrence of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.shared.subscriptions.subscribe(kind, Arc::new(handler))
    }

    /// Remove a handler; unknown handles are ignored
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.shared.subscriptions.unsubscribe(kind, id)
    }

    /// Register a callback for connection-level failures
    pub fn on_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&RelayError) + Send + Sync + 'static,
    {
        self.shared.subscriptions.subscribe_errors(Arc::new(handler))
    }

    pub fn off_error(&self, id: SubscriptionId) -> bool {
        self.shared.subscriptions.unsubscribe_errors(id)
    }

    /// Close the connection and release every handler.
    ///
    /// No handler fires once this returns. The transport is closed in the
    /// background within the configured shutdown timeout.
    pub fn teardown(mut self) {
        self.release();
    }

    /// Teardown, then wait for the transport to finish closing
    pub async fn close(mut self) {
        self.release();
        if let Some(mut task) = self.task.take() {
            let limit = self.shutdown_timeout + CLOSE_GRACE;
            if tokio::time::timeout(limit, &mut task).await.is_err() {
                warn!("Relay driver did not stop in time, aborting");
                task.abort();
            }
        }
    }

    fn release(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };

        self.shared.subscriptions.close();
        self.shared.state.terminate();
        *self.shared.socket_id.write() = None;

        // The driver may already have exited on its own
        let _ = shutdown.send(());
        debug!("Relay client torn down");
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.release();
    }
}
