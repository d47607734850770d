use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::Config;

/// Show the saved configuration, or update it when flags are given
pub fn run(api_url: Option<String>, token: Option<String>) -> Result<()> {
    let mut config = Config::load()?;

    if api_url.is_none() && token.is_none() {
        println!("{}", "Zhonya Config".bold());
        println!();
        println!("  API URL: {}", config.api_url());
        println!(
            "  Token:   {}",
            if config.token.is_some() { "set".green() } else { "not set".dimmed() }
        );
        println!(
            "  Relay:   {}",
            if config.relay.is_some() { "custom".normal() } else { "defaults".dimmed() }
        );
        println!("  File:    {}", Config::path()?.display().to_string().dimmed());
        return Ok(());
    }

    if let Some(url) = api_url {
        reqwest::Url::parse(&url).with_context(|| format!("Invalid API URL: {}", url))?;
        config.api_url = Some(url);
    }
    if let Some(token) = token {
        // An empty token clears the saved one
        config.token = Some(token).filter(|t| !t.is_empty());
    }
    config.save()?;

    println!(
        "{} Config saved to {}",
        "✓".green().bold(),
        Config::path()?.display().to_string().dimmed()
    );
    Ok(())
}
