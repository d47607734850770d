//! Progress rendering shared by `download` and `watch`.
//!
//! Handlers run on the relay's driver task, so they only forward events
//! into a channel; all terminal output happens here.

use anyhow::{bail, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;

use zhonya_relay::{
    CompletePayload, ErrorPayload, EventKind, PlayerProgressPayload, RelayClient, ServerEvent,
};

const LIVENESS_CHECK: Duration = Duration::from_millis(250);

enum Update {
    Event(ServerEvent),
    Error(String),
}

/// How a followed session ended
pub enum Outcome {
    Complete(CompletePayload),
    Failed(ErrorPayload),
}

pub struct Follower {
    updates: mpsc::UnboundedReceiver<Update>,
}

impl Follower {
    /// Subscribe to every event kind and to connection errors
    pub fn attach(client: &RelayClient) -> Self {
        let (tx, updates) = mpsc::unbounded_channel();

        for kind in EventKind::ALL {
            let tx = tx.clone();
            client.subscribe(kind, move |event| {
                let _ = tx.send(Update::Event(event.clone()));
            });
        }
        client.on_error(move |error| {
            let _ = tx.send(Update::Error(error.to_string()));
        });

        Self { updates }
    }

    /// Render progress until a terminal event arrives
    pub async fn run(mut self, client: &RelayClient) -> Result<Outcome> {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.blue} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message("waiting for the server...");

        let mut liveness = tokio::time::interval(LIVENESS_CHECK);
        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(interrupt);

        loop {
            tokio::select! {
                biased;

                update = self.updates.recv() => match update {
                    Some(Update::Event(event)) => {
                        if let Some(outcome) = render(&bar, event) {
                            return Ok(outcome);
                        }
                    }
                    Some(Update::Error(message)) => {
                        bar.println(format!("{} {}", "!".yellow().bold(), message));
                    }
                    None => {
                        bar.abandon();
                        bail!("Relay stopped delivering events");
                    }
                },

                _ = liveness.tick() => {
                    if client.is_finished() {
                        bar.abandon_with_message("connection lost");
                        let reason = client
                            .last_error()
                            .unwrap_or_else(|| "server closed the connection".to_string());
                        bail!("Relay connection lost: {}", reason);
                    }
                }

                _ = &mut interrupt => {
                    bar.abandon_with_message("interrupted");
                    bail!("Interrupted");
                }
            }
        }
    }
}

/// Update the bar for one event; returns the outcome for terminal events
fn render(bar: &ProgressBar, event: ServerEvent) -> Option<Outcome> {
    match event {
        ServerEvent::Progress(payload) => {
            bar.set_position(percent(payload.progress));
            bar.set_message("downloading");
            None
        }
        ServerEvent::DownloadProgress(payload) => {
            bar.set_position(percent(payload.progress));
            bar.set_message(player_status(&payload));
            None
        }
        ServerEvent::DownloadComplete(payload) => {
            bar.set_position(100);
            bar.finish_with_message("done");
            Some(Outcome::Complete(payload))
        }
        ServerEvent::DownloadError(payload) => {
            bar.abandon_with_message("failed");
            Some(Outcome::Failed(payload))
        }
    }
}

/// Print the outcome; a failed download becomes the command's error
pub fn report(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Complete(payload) => {
            let who = payload
                .username
                .or_else(|| player_label(payload.player_name, payload.player_tag))
                .unwrap_or_else(|| "player".to_string());
            println!("{} Download complete for {}", "✓".green().bold(), who.bold());
            if let Some(message) = payload.message {
                println!("  {}", message.dimmed());
            }
            Ok(())
        }
        Outcome::Failed(payload) => match player_label(payload.player_name, payload.player_tag) {
            Some(who) => bail!("Download failed for {}: {}", who, payload.error),
            None => bail!("Download failed: {}", payload.error),
        },
    }
}

fn percent(progress: f64) -> u64 {
    if progress.is_nan() {
        return 0;
    }
    progress.clamp(0.0, 100.0).round() as u64
}

fn player_label(name: Option<String>, tag: Option<String>) -> Option<String> {
    match (name, tag) {
        (Some(name), Some(tag)) => Some(format!("{}#{}", name, tag)),
        (Some(name), None) => Some(name),
        _ => None,
    }
}

fn player_status(payload: &PlayerProgressPayload) -> String {
    format!(
        "{}#{} ({}/{})",
        payload.player_name, payload.player_tag, payload.current, payload.total
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_clamped() {
        assert_eq!(percent(42.4), 42);
        assert_eq!(percent(-3.0), 0);
        assert_eq!(percent(250.0), 100);
        assert_eq!(percent(f64::NAN), 0);
    }

    #[test]
    fn test_player_label() {
        assert_eq!(
            player_label(Some("Faker".to_string()), Some("KR1".to_string())).as_deref(),
            Some("Faker#KR1")
        );
        assert_eq!(player_label(None, Some("KR1".to_string())), None);
    }

    #[test]
    fn test_terminal_events_end_the_follow() {
        let bar = ProgressBar::hidden();
        let progress = ServerEvent::DownloadProgress(PlayerProgressPayload {
            player_name: "Faker".to_string(),
            player_tag: "KR1".to_string(),
            progress: 50.0,
            current: 2,
            total: 5,
        });
        assert!(render(&bar, progress).is_none());
        assert_eq!(bar.position(), 50);

        let failed = ServerEvent::DownloadError(ErrorPayload {
            error: "Player not found".to_string(),
            player_name: None,
            player_tag: None,
        });
        let outcome = render(&bar, failed).unwrap();
        let err = report(outcome).unwrap_err();
        assert_eq!(err.to_string(), "Download failed: Player not found");
    }
}
