use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use zhonya_relay::{DefaultConnector, RelayClient, RelayConfig};

use crate::api::ApiClient;
use crate::commands::follow::{self, Follower};
use crate::config::Config;

#[derive(Debug, Serialize)]
struct DownloadRequest<'a> {
    username: &'a str,
    nb_games: u32,
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct DownloadStarted {
    pub status: String,
    pub session_id: String,
}

/// Start a download for `username` and follow it to completion
pub async fn run(config: &Config, relay: RelayConfig, username: &str, games: u32) -> Result<()> {
    if !username.contains('#') {
        bail!("Username must include a tag, e.g. Faker#KR1");
    }
    if games == 0 {
        bail!("Number of games must be at least 1");
    }

    let api = ApiClient::from_config(config)?;
    let connect_timeout = relay.endpoint.connect_timeout();

    println!(
        "{} Connecting to relay at {}...",
        "→".blue().bold(),
        relay.endpoint.url
    );
    let connector = DefaultConnector::with_http_client(api.http_client());
    let client = RelayClient::with_connector(relay, Arc::new(connector));
    let follower = Follower::attach(&client);

    if !client.wait_connected(connect_timeout).await {
        let reason = client
            .last_error()
            .unwrap_or_else(|| "timed out".to_string());
        client.close().await;
        bail!("Could not connect to the relay: {}", reason);
    }
    // Events are scoped to our own socket id, as the web player page does
    let socket_id = client
        .socket_id()
        .context("Relay connected without a socket id")?;

    println!(
        "{} Requesting {} game(s) for {}...",
        "→".blue().bold(),
        games,
        username.bold()
    );
    let started: DownloadStarted = api
        .post(
            "/api/download",
            &DownloadRequest {
                username,
                nb_games: games,
                session_id: &socket_id,
            },
        )
        .await?;
    debug!(session_id = %started.session_id, status = %started.status, "Download started");
    client.join(&started.session_id);

    let outcome = follower.run(&client).await;
    client.close().await;
    follow::report(outcome?)
}
