//! Transport Abstraction
//!
//! A transport moves Engine.IO text frames between the client and the
//! backend. Two implementations exist: a persistent WebSocket and an HTTP
//! long-polling fallback. The [`Connector`] opens them by kind so the driver
//! can walk the configured preference list.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::EndpointConfig;
use crate::connection::polling::PollingTransport;
use crate::connection::websocket::WebSocketTransport;
use crate::error::{RelayError, Result};

/// Engine.IO protocol revision spoken by this client
pub const ENGINE_IO_VERSION: &str = "4";

/// Available transport kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent, low-latency WebSocket
    WebSocket,
    /// HTTP long-polling
    Polling,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" => Ok(TransportKind::WebSocket),
            "polling" => Ok(TransportKind::Polling),
            other => Err(RelayError::InvalidEndpoint(format!(
                "unknown transport: {}",
                other
            ))),
        }
    }
}

/// Backend address plus the Socket.IO mount path
#[derive(Debug, Clone)]
pub struct Endpoint {
    base: Url,
    path: String,
}

impl Endpoint {
    pub fn new(url: &str, path: &str) -> Result<Self> {
        let base = Url::parse(url)
            .map_err(|e| RelayError::InvalidEndpoint(format!("{}: {}", url, e)))?;

        if !matches!(base.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(RelayError::InvalidEndpoint(format!(
                "unsupported scheme: {}",
                base.scheme()
            )));
        }

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        Ok(Self { base, path })
    }

    pub fn from_config(config: &EndpointConfig) -> Result<Self> {
        Self::new(&config.url, &config.path)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Build the URL a transport of `kind` connects to
    pub fn transport_url(&self, kind: TransportKind, sid: Option<&str>) -> Result<Url> {
        let mut url = self.base.clone();
        url.set_path(&self.path);
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.append_pair("EIO", ENGINE_IO_VERSION);
            query.append_pair("transport", kind.as_str());
            if let Some(sid) = sid {
                query.append_pair("sid", sid);
            }
        }

        let scheme = match (kind, url.scheme()) {
            (TransportKind::WebSocket, "http") | (TransportKind::WebSocket, "ws") => "ws",
            (TransportKind::WebSocket, _) => "wss",
            (TransportKind::Polling, "ws") | (TransportKind::Polling, "http") => "http",
            (TransportKind::Polling, _) => "https",
        };
        url.set_scheme(scheme)
            .map_err(|_| RelayError::InvalidEndpoint(format!("cannot use scheme {}", scheme)))?;

        Ok(url)
    }
}

/// A bidirectional Engine.IO frame channel.
///
/// `recv` must be cancel safe: the driver polls it inside `select!`.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Send one text frame
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Receive the next text frame, or `None` once the peer has closed
    async fn recv(&mut self) -> Result<Option<String>>;

    /// Close the transport and release its resources
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports on behalf of the driver
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, kind: TransportKind, endpoint: &Endpoint)
        -> Result<Box<dyn Transport>>;
}

/// Connector backed by tokio-tungstenite and reqwest
#[derive(Clone, Default)]
pub struct DefaultConnector {
    http: reqwest::Client,
}

impl DefaultConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse an existing HTTP client for the polling transport
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(
        &self,
        kind: TransportKind,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn Transport>> {
        match kind {
            TransportKind::WebSocket => {
                let url = endpoint.transport_url(kind, None)?;
                Ok(Box::new(WebSocketTransport::connect(&url).await?))
            }
            TransportKind::Polling => Ok(Box::new(
                PollingTransport::connect(self.http.clone(), endpoint).await?,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url() {
        let endpoint = Endpoint::new("http://localhost:5000", "/socket.io/").unwrap();
        let url = endpoint.transport_url(TransportKind::WebSocket, None).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );

        let secure = Endpoint::new("https://zhonya.example", "socket.io/").unwrap();
        let url = secure.transport_url(TransportKind::WebSocket, None).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/socket.io/");
    }

    #[test]
    fn test_polling_url_with_sid() {
        let endpoint = Endpoint::new("http://localhost:5000", "/socket.io/").unwrap();
        let url = endpoint
            .transport_url(TransportKind::Polling, Some("abc123"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/socket.io/?EIO=4&transport=polling&sid=abc123"
        );
    }

    #[test]
    fn test_invalid_endpoints() {
        assert!(Endpoint::new("localhost:5000", "/socket.io/").is_err());
        assert!(Endpoint::new("ftp://localhost", "/socket.io/").is_err());
        assert!(Endpoint::new("not a url", "/").is_err());
    }

    #[test]
    fn test_transport_kind_parsing() {
        assert_eq!("WebSocket".parse::<TransportKind>().unwrap(), TransportKind::WebSocket);
        assert_eq!("polling".parse::<TransportKind>().unwrap(), TransportKind::Polling);
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }
}
