//! Relay Errors
//!
//! Error taxonomy for the transport, protocol and handshake layers. None of
//! these reach callers of the public client operations; the driver turns them
//! into state transitions, error callbacks and log lines.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while establishing or running a relay connection
#[derive(Debug, Error)]
pub enum RelayError {
    /// The configured endpoint cannot be turned into a transport URL
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// WebSocket transport failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP polling transport failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Polling request answered with a non-success status
    #[error("polling request failed with status {0}")]
    HttpStatus(u16),

    /// JSON encoding or decoding failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer sent something that is not valid Engine.IO / Socket.IO
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Packet types this client does not implement (binary events, acks)
    #[error("unsupported packet: {0}")]
    Unsupported(String),

    /// Handshake did not complete in time
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The server refused the Socket.IO connect
    #[error("server rejected connection: {0}")]
    ConnectRejected(String),

    /// No ping received within pingInterval + pingTimeout
    #[error("ping timeout")]
    PingTimeout,

    /// The transport closed before the operation completed
    #[error("transport closed")]
    Closed,

    /// Every transport in the preference list failed
    #[error("no transport available: {0}")]
    NoTransport(String),
}

/// Result alias used throughout the relay crate
pub type Result<T> = std::result::Result<T, RelayError>;
