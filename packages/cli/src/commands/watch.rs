use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;

use zhonya_relay::{DefaultConnector, RelayClient, RelayConfig};

use crate::api::ApiClient;
use crate::commands::follow::{self, Follower};
use crate::config::Config;

/// Follow the events of a session started elsewhere
pub async fn run(config: &Config, relay: RelayConfig, session_id: &str) -> Result<()> {
    let api = ApiClient::from_config(config)?;

    println!(
        "{} Watching session {} on {}",
        "→".blue().bold(),
        session_id.bold(),
        relay.endpoint.url
    );

    let connector = DefaultConnector::with_http_client(api.http_client());
    let client = RelayClient::with_connector(relay, Arc::new(connector));
    let follower = Follower::attach(&client);
    // Sent as soon as the connection is up
    client.join(session_id);

    let outcome = follower.run(&client).await;
    client.close().await;
    follow::report(outcome?)
}
