//! Zhonya Relay Library
//!
//! Client side of the real-time progress relay used while match history is
//! downloaded: one [`RelayClient`] per download view, Socket.IO framing over
//! WebSocket with HTTP long-polling fallback, typed progress events and
//! deterministic teardown.

pub mod config;
pub mod connection;
pub mod error;
pub mod relay;

// Re-exports for convenience
pub use config::RelayConfig;
pub use connection::protocol::{
    CompletePayload, ErrorPayload, EventKind, PlayerProgressPayload, ProgressPayload, ServerEvent,
};
pub use connection::transport::{Connector, DefaultConnector, Endpoint, Transport, TransportKind};
pub use error::RelayError;
pub use relay::client::RelayClient;
pub use relay::state::ConnectionState;
pub use relay::subscriptions::SubscriptionId;
