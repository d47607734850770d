//! In-memory transport used by the lifecycle tests.
//!
//! `MemoryConnector` hands every accepted transport to a `MemoryServer`,
//! which plays the Socket.IO backend frame by frame.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::connection::protocol::{EnginePacket, Handshake, SocketPacket};
use crate::connection::transport::{Connector, Endpoint, Transport, TransportKind};
use crate::error::{RelayError, Result};

const WAIT: Duration = Duration::from_secs(5);

pub(crate) struct MemoryConnector {
    accepted: mpsc::UnboundedSender<ServerConnection>,
    refused: Vec<TransportKind>,
    attempts: Arc<AtomicUsize>,
}

pub(crate) struct MemoryServer {
    incoming: mpsc::UnboundedReceiver<ServerConnection>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub(crate) fn pair() -> (Arc<Self>, MemoryServer) {
        Self::refusing(Vec::new())
    }

    /// Connector that fails every transport of the listed kinds
    pub(crate) fn refusing(refused: Vec<TransportKind>) -> (Arc<Self>, MemoryServer) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(Self {
            accepted,
            refused,
            attempts: Arc::clone(&attempts),
        });
        (connector, MemoryServer { incoming, attempts })
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        kind: TransportKind,
        _endpoint: &Endpoint,
    ) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refused.contains(&kind) {
            return Err(RelayError::Closed);
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        self.accepted
            .send(ServerConnection {
                kind,
                to_client,
                from_client,
            })
            .map_err(|_| RelayError::Closed)?;

        Ok(Box::new(MemoryTransport {
            kind,
            inbound,
            outbound: Some(outbound),
        }))
    }
}

struct MemoryTransport {
    kind: TransportKind,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&mut self, frame: String) -> Result<()> {
        self.outbound
            .as_ref()
            .ok_or(RelayError::Closed)?
            .send(frame)
            .map_err(|_| RelayError::Closed)
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) -> Result<()> {
        self.outbound = None;
        self.inbound.close();
        Ok(())
    }
}

impl MemoryServer {
    /// Wait for the client to open the next transport
    pub(crate) async fn accept(&mut self) -> ServerConnection {
        timeout(WAIT, self.incoming.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Accept and complete both handshakes with the given socket id
    pub(crate) async fn accept_connected(&mut self, sid: &str) -> ServerConnection {
        let mut conn = self.accept().await;
        conn.handshake(sid).await;
        conn
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Server side of one memory transport
pub(crate) struct ServerConnection {
    pub(crate) kind: TransportKind,
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerConnection {
    pub(crate) fn send(&self, frame: &str) {
        let _ = self.to_client.send(frame.to_string());
    }

    pub(crate) fn open(&self, sid: &str) {
        let handshake = Handshake {
            sid: sid.to_string(),
            upgrades: Vec::new(),
            ping_interval: 25000,
            ping_timeout: 20000,
            max_payload: Some(1_000_000),
        };
        self.send(&EnginePacket::Open(handshake).encode().expect("encode open"));
    }

    /// Engine open, expect `40`, acknowledge with the socket id
    pub(crate) async fn handshake(&mut self, sid: &str) {
        self.open(&format!("engine-{}", sid));
        assert_eq!(self.expect().await, "40");
        self.send(&format!("40{}", json!({ "sid": sid })));
    }

    pub(crate) fn emit(&self, event: &str, data: Value) {
        let frame = SocketPacket::event(event, data)
            .to_frame()
            .expect("encode event");
        self.send(&frame);
    }

    /// Next frame sent by the client
    pub(crate) async fn expect(&mut self) -> String {
        timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the transport")
    }

    /// Next frame if one arrives within `wait`
    pub(crate) async fn try_expect(&mut self, wait: Duration) -> Option<String> {
        timeout(wait, self.from_client.recv()).await.ok().flatten()
    }

    /// Wait until the client closes its side, returning the frames it sent first
    pub(crate) async fn closed(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        loop {
            match timeout(WAIT, self.from_client.recv()).await {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return frames,
                Err(_) => panic!("client never closed the transport"),
            }
        }
    }
}
