//! WebSocket Transport
//!
//! Persistent WebSocket connection to the relay endpoint.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::connection::transport::{Transport, TransportKind};
use crate::error::Result;

/// Engine.IO over a single WebSocket
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    /// Open a WebSocket to `url`
    pub async fn connect(url: &Url) -> Result<Self> {
        debug!(url = %url, "Opening WebSocket transport");
        let (stream, _response) = connect_async(url.as_str()).await?;
        info!("WebSocket connection established");
        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn send(&mut self, frame: String) -> Result<()> {
        self.stream.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite queues the pong and flushes it on the next read or write
                    debug!("Received ping");
                }
                Some(Ok(Message::Pong(_))) => {
                    debug!("Received pong");
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Received close frame");
                    return Ok(None);
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!("Received binary message (ignored)");
                }
                Some(Ok(Message::Frame(_))) => {
                    // Raw frame, typically not used
                }
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    info!("WebSocket stream ended");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
