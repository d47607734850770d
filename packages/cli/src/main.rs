use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use zhonya_relay::config::LoggingConfig;

mod api;
mod commands;
mod config;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "zhonya", about = "Zhonya CLI - Follow match download progress")]
#[command(version, propagate_version = true)]
struct Cli {
    /// Relay settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download recent games for a player and follow the progress
    Download {
        /// Riot ID, e.g. Faker#KR1
        username: String,

        /// Number of games to fetch per queue
        #[arg(short = 'n', long, default_value = "1")]
        games: u32,
    },

    /// Follow the progress events of an existing session
    Watch {
        /// Session ID to join
        session_id: String,
    },

    /// Show or update the saved configuration
    Config {
        /// API base URL
        #[arg(long)]
        api_url: Option<String>,

        /// API token (empty to clear)
        #[arg(long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { api_url, token } = cli.command {
        init_logging(cli.verbose, &LoggingConfig::default());
        return commands::config::run(api_url, token);
    }

    let config = Config::load()?;
    let relay = config.relay_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &relay.logging);

    match cli.command {
        Commands::Download { username, games } => {
            commands::download::run(&config, relay, &username, games).await
        }
        Commands::Watch { session_id } => commands::watch::run(&config, relay, &session_id).await,
        Commands::Config { .. } => Ok(()),
    }
}

/// Log to stderr so progress output on stdout stays readable
fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
