//! Session Driver
//!
//! Background task owned by a relay client. It opens a transport in
//! preference order, performs the Engine.IO/Socket.IO handshake, answers
//! heartbeats, dispatches events to the subscription registry, and
//! reconnects with backoff after a lost session.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::connection::protocol::{
    EnginePacket, Handshake, ServerEvent, SocketPacket, SocketPacketKind,
};
use crate::connection::transport::{Connector, Endpoint, Transport, TransportKind};
use crate::error::{RelayError, Result};
use crate::relay::state::ConnectionStateManager;
use crate::relay::subscriptions::SubscriptionRegistry;

/// State shared between a client handle and its driver
pub(crate) struct Shared {
    pub(crate) state: ConnectionStateManager,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) socket_id: RwLock<Option<String>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnectionStateManager::new(),
            subscriptions: SubscriptionRegistry::new(),
            socket_id: RwLock::new(None),
        }
    }
}

/// Outbound requests queued by the client handle
#[derive(Debug)]
pub(crate) enum Command {
    Emit { event: String, data: Value },
}

/// An established Socket.IO session
struct Session {
    transport: Box<dyn Transport>,
    handshake: Handshake,
    socket_id: String,
}

/// Why a session stopped
enum SessionEnd {
    Shutdown,
    ServerDisconnect,
    Closed(String),
    Failed(RelayError),
}

/// What a single inbound frame asks the driver to do
enum FrameOutcome {
    Continue,
    Pinged,
    ServerDisconnect,
    Closed,
}

pub(crate) struct Driver {
    config: RelayConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
    pub(crate) fn new(
        config: RelayConfig,
        connector: Arc<dyn Connector>,
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            config,
            connector,
            shared,
            commands,
        }
    }

    /// Run until shutdown, a server-initiated disconnect, or reconnection
    /// gives up
    pub(crate) async fn run(self, shutdown: oneshot::Receiver<()>) {
        let shared = Arc::clone(&self.shared);
        self.run_sessions(shutdown).await;
        shared.state.mark_finished();
        debug!("Relay driver stopped");
    }

    async fn run_sessions(mut self, mut shutdown: oneshot::Receiver<()>) {
        let endpoint = match Endpoint::from_config(&self.config.endpoint) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.fail(&e);
                return;
            }
        };

        let mut attempt: u32 = 0;

        loop {
            self.shared.state.set_connecting();

            let established = tokio::select! {
                _ = &mut shutdown => {
                    debug!("Shutdown requested while connecting");
                    return;
                }
                result = self.establish(&endpoint) => result,
            };

            match established {
                Ok(mut session) => {
                    attempt = 0;
                    info!(
                        socket_id = %session.socket_id,
                        transport = %session.transport.kind(),
                        "Relay connected"
                    );
                    *self.shared.socket_id.write() = Some(session.socket_id.clone());
                    self.shared.state.set_connected();

                    let end = self.drive(&mut session, &mut shutdown).await;
                    *self.shared.socket_id.write() = None;

                    match end {
                        SessionEnd::Shutdown => {
                            self.close_session(&mut session).await;
                            return;
                        }
                        SessionEnd::ServerDisconnect => {
                            info!("Server disconnected the socket, not reconnecting");
                            self.shared
                                .state
                                .set_disconnected(Some("Server disconnected".to_string()));
                            if let Err(e) = session.transport.close().await {
                                debug!(error = %e, "Error while closing relay transport");
                            }
                            return;
                        }
                        SessionEnd::Closed(reason) => {
                            info!(reason = %reason, "Relay connection closed");
                            self.shared.state.set_disconnected(Some(reason));
                        }
                        SessionEnd::Failed(e) => {
                            if let Err(close_error) = session.transport.close().await {
                                debug!(error = %close_error, "Error while closing relay transport");
                            }
                            self.fail(&e);
                        }
                    }
                }
                Err(e) => self.fail(&e),
            }

            attempt += 1;
            if !self.config.reconnect.allows(attempt) {
                info!(attempts = attempt, "Reconnection disabled or exhausted");
                return;
            }

            let delay = self.config.reconnect.delay_for(attempt);
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Waiting before reconnection attempt"
            );
            tokio::select! {
                _ = &mut shutdown => return,
                _ = sleep(delay) => {}
            }
        }
    }

    /// Report a connection-level failure: Error, then Disconnected
    fn fail(&self, e: &RelayError) {
        error!(error = %e, "Relay connection error");
        self.shared.state.set_error(e.to_string());
        self.shared.subscriptions.dispatch_error(e);
        self.shared.state.set_disconnected(Some(e.to_string()));
    }

    /// Try each configured transport in order
    async fn establish(&self, endpoint: &Endpoint) -> Result<Session> {
        let connect_timeout = self.config.endpoint.connect_timeout();
        let mut failures = Vec::new();

        for kind in &self.config.endpoint.transports {
            info!(transport = %kind, url = %endpoint.base(), "Connecting to relay endpoint");

            match timeout(connect_timeout, self.open_session(*kind, endpoint)).await {
                Ok(Ok(session)) => return Ok(session),
                Ok(Err(RelayError::ConnectRejected(reason))) => {
                    // A refusal is an answer from the server, another transport won't change it
                    return Err(RelayError::ConnectRejected(reason));
                }
                Ok(Err(e)) => {
                    warn!(transport = %kind, error = %e, "Transport failed");
                    failures.push(format!("{}: {}", kind, e));
                }
                Err(_) => {
                    warn!(transport = %kind, "Transport handshake timed out");
                    failures.push(format!("{}: {}", kind, RelayError::Timeout(connect_timeout)));
                }
            }
        }

        Err(RelayError::NoTransport(failures.join("; ")))
    }

    /// Open one transport and complete both handshakes on it
    async fn open_session(&self, kind: TransportKind, endpoint: &Endpoint) -> Result<Session> {
        let mut transport = self.connector.connect(kind, endpoint).await?;

        let handshake = loop {
            let frame = transport.recv().await?.ok_or(RelayError::Closed)?;
            match EnginePacket::decode(&frame)? {
                EnginePacket::Open(handshake) => break handshake,
                EnginePacket::Noop => continue,
                other => {
                    return Err(RelayError::Protocol(format!(
                        "expected open packet, got {:?}",
                        other
                    )))
                }
            }
        };
        debug!(
            sid = %handshake.sid,
            ping_interval = handshake.ping_interval,
            ping_timeout = handshake.ping_timeout,
            "Engine.IO handshake received"
        );

        transport.send(SocketPacket::connect().to_frame()?).await?;

        let socket_id = loop {
            let frame = transport.recv().await?.ok_or(RelayError::Closed)?;
            match EnginePacket::decode(&frame)? {
                EnginePacket::Ping(data) => {
                    transport.send(EnginePacket::Pong(data).encode()?).await?;
                }
                EnginePacket::Message(data) => {
                    let packet = SocketPacket::decode(&data)?;
                    if !packet.is_default_namespace() {
                        continue;
                    }
                    match packet.kind {
                        SocketPacketKind::Connect(payload) => {
                            break payload
                                .as_ref()
                                .and_then(|p| p.get("sid"))
                                .and_then(Value::as_str)
                                .map(str::to_string)
                                .unwrap_or_else(|| handshake.sid.clone());
                        }
                        SocketPacketKind::ConnectError(data) => {
                            return Err(RelayError::ConnectRejected(describe_rejection(&data)));
                        }
                        other => debug!(?other, "Ignoring packet before connect acknowledgement"),
                    }
                }
                EnginePacket::Close => return Err(RelayError::Closed),
                _ => {}
            }
        };

        Ok(Session {
            transport,
            handshake,
            socket_id,
        })
    }

    /// Pump one connected session until it ends
    async fn drive(
        &mut self,
        session: &mut Session,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> SessionEnd {
        let heartbeat = session.handshake.heartbeat_deadline();
        let mut deadline = Instant::now() + heartbeat;

        loop {
            tokio::select! {
                _ = &mut *shutdown => return SessionEnd::Shutdown,

                frame = session.transport.recv() => {
                    match frame {
                        Ok(Some(frame)) => match self.handle_frame(session, &frame).await {
                            Ok(FrameOutcome::Continue) => {}
                            Ok(FrameOutcome::Pinged) => deadline = Instant::now() + heartbeat,
                            Ok(FrameOutcome::ServerDisconnect) => return SessionEnd::ServerDisconnect,
                            Ok(FrameOutcome::Closed) => {
                                return SessionEnd::Closed("Server closed the transport".to_string())
                            }
                            Err(e) => return SessionEnd::Failed(e),
                        },
                        Ok(None) => return SessionEnd::Closed("Transport closed".to_string()),
                        Err(e) => return SessionEnd::Failed(e),
                    }
                }

                command = self.commands.recv() => {
                    match command {
                        Some(Command::Emit { event, data }) => {
                            let frame = match SocketPacket::event(&event, data).to_frame() {
                                Ok(frame) => frame,
                                Err(e) => {
                                    warn!(event = %event, error = %e, "Failed to encode outbound event");
                                    continue;
                                }
                            };
                            debug!(event = %event, "Sending event to relay");
                            if let Err(e) = session.transport.send(frame).await {
                                return SessionEnd::Failed(e);
                            }
                        }
                        // Client handle dropped
                        None => return SessionEnd::Shutdown,
                    }
                }

                _ = sleep_until(deadline) => return SessionEnd::Failed(RelayError::PingTimeout),
            }
        }
    }

    async fn handle_frame(&self, session: &mut Session, frame: &str) -> Result<FrameOutcome> {
        let packet = match EnginePacket::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable engine packet");
                return Ok(FrameOutcome::Continue);
            }
        };

        match packet {
            EnginePacket::Ping(data) => {
                debug!("Received ping, sending pong");
                session
                    .transport
                    .send(EnginePacket::Pong(data).encode()?)
                    .await?;
                Ok(FrameOutcome::Pinged)
            }
            EnginePacket::Close => Ok(FrameOutcome::Closed),
            EnginePacket::Message(data) => Ok(self.handle_message(&data)),
            EnginePacket::Open(_)
            | EnginePacket::Pong(_)
            | EnginePacket::Upgrade
            | EnginePacket::Noop => Ok(FrameOutcome::Continue),
        }
    }

    fn handle_message(&self, data: &str) -> FrameOutcome {
        let packet = match SocketPacket::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable socket packet");
                return FrameOutcome::Continue;
            }
        };

        if !packet.is_default_namespace() {
            debug!(namespace = %packet.namespace, "Ignoring packet for another namespace");
            return FrameOutcome::Continue;
        }

        match packet.kind {
            SocketPacketKind::Event { name, args, .. } => {
                self.dispatch(&name, &args);
                FrameOutcome::Continue
            }
            SocketPacketKind::Disconnect => FrameOutcome::ServerDisconnect,
            SocketPacketKind::ConnectError(data) => {
                warn!(reason = %describe_rejection(&data), "Connect error on an open session");
                FrameOutcome::Continue
            }
            SocketPacketKind::Connect(_) | SocketPacketKind::Ack { .. } => FrameOutcome::Continue,
        }
    }

    fn dispatch(&self, name: &str, args: &[Value]) {
        match ServerEvent::decode(name, args) {
            Some(Ok(event)) => {
                let delivered = self.shared.subscriptions.dispatch(&event);
                debug!(event = %name, handlers = delivered, "Dispatched server event");
                if event.kind().is_terminal() {
                    info!(event = %name, "Download session reached a terminal event");
                }
            }
            Some(Err(e)) => {
                warn!(event = %name, error = %e, "Dropping event with malformed payload");
            }
            None => {
                debug!(event = %name, "Ignoring unknown event");
            }
        }
    }

    /// Graceful close on teardown, bounded by the shutdown timeout
    async fn close_session(&self, session: &mut Session) {
        let limit = self.config.endpoint.shutdown_timeout();
        let graceful = async {
            let frame = SocketPacket::disconnect().to_frame()?;
            session.transport.send(frame).await?;
            session.transport.close().await
        };

        match timeout(limit, graceful).await {
            Ok(Ok(())) => debug!("Relay transport closed"),
            Ok(Err(e)) => debug!(error = %e, "Error while closing relay transport"),
            Err(_) => warn!(timeout_ms = limit.as_millis() as u64, "Timed out closing relay transport"),
        }
    }
}

fn describe_rejection(data: &Value) -> String {
    match data {
        Value::String(message) => message.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string()),
        other => other.to_string(),
    }
}
