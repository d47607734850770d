//! HTTP Long-Polling Transport
//!
//! Fallback for networks where WebSockets are blocked. A background task
//! keeps one GET outstanding at a time and feeds decoded frames into a
//! channel, which keeps `recv` cancel safe.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::protocol::{split_payload, EnginePacket};
use crate::connection::transport::{Endpoint, Transport, TransportKind};
use crate::error::{RelayError, Result};

/// Frames buffered between the poll task and the driver
const INBOUND_CAPACITY: usize = 64;

/// Engine.IO over HTTP long-polling
pub struct PollingTransport {
    client: reqwest::Client,
    url: Url,
    inbound: mpsc::Receiver<Result<String>>,
    poller: Option<JoinHandle<()>>,
}

impl PollingTransport {
    /// Perform the opening GET and start polling the session it creates
    pub async fn connect(client: reqwest::Client, endpoint: &Endpoint) -> Result<Self> {
        let handshake_url = endpoint.transport_url(TransportKind::Polling, None)?;
        debug!(url = %handshake_url, "Opening polling transport");

        let body = fetch(&client, &handshake_url).await?;
        let frames = split_payload(&body);

        let sid = match frames.first().map(|frame| EnginePacket::decode(frame)) {
            Some(Ok(EnginePacket::Open(handshake))) => handshake.sid,
            Some(Ok(other)) => {
                return Err(RelayError::Protocol(format!(
                    "expected open packet, got {:?}",
                    other
                )))
            }
            Some(Err(e)) => return Err(e),
            None => return Err(RelayError::Protocol("empty polling handshake".to_string())),
        };

        let url = endpoint.transport_url(TransportKind::Polling, Some(&sid))?;
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);

        // The open packet goes through the channel so the driver sees the
        // same handshake sequence on every transport.
        for frame in frames {
            if tx.send(Ok(frame)).await.is_err() {
                return Err(RelayError::Closed);
            }
        }

        let poller = tokio::spawn(poll_loop(client.clone(), url.clone(), tx));
        debug!(sid = %sid, "Polling transport established");

        Ok(Self {
            client,
            url,
            inbound,
            poller: Some(poller),
        })
    }

    async fn post(&self, body: String) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RelayError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

async fn fetch(client: &reqwest::Client, url: &Url) -> Result<String> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RelayError::HttpStatus(status.as_u16()));
    }
    Ok(response.text().await?)
}

async fn poll_loop(client: reqwest::Client, url: Url, tx: mpsc::Sender<Result<String>>) {
    loop {
        match fetch(&client, &url).await {
            Ok(body) => {
                for frame in split_payload(&body) {
                    let closing = frame == "1";
                    if tx.send(Ok(frame)).await.is_err() {
                        return;
                    }
                    if closing {
                        debug!("Server closed the polling session");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Polling request failed");
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn send(&mut self, frame: String) -> Result<()> {
        self.post(frame).await
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(poller) = self.poller.take() {
            poller.abort();
            let close = EnginePacket::Close.encode()?;
            if let Err(e) = self.post(close).await {
                debug!(error = %e, "Failed to send close packet over polling");
            }
        }
        self.inbound.close();
        Ok(())
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}
