//! `pixiscope console`: stream the page's console output.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use pixiscope_browser::{ConsoleLevel, ConsoleMessage};

use super::print_json;
use crate::config::PixiscopeConfig;
use crate::connection::Connection;
use crate::watch::StopHandle;

#[derive(Debug, Clone, Default)]
pub struct ConsoleOptions {
    /// Lowest level shown.
    pub level: Option<ConsoleLevel>,
    pub json: bool,
    /// Clear the console instead of streaming it.
    pub clear: bool,
}

pub fn format_message(message: &ConsoleMessage) -> String {
    format!(
        "{} [{:<5}] {}: {}",
        message.timestamp.format("%H:%M:%S%.3f"),
        message.level.as_str(),
        message.source,
        message.text
    )
}

pub fn should_show(message: &ConsoleMessage, min_level: Option<ConsoleLevel>) -> bool {
    min_level.map_or(true, |min| message.level >= min)
}

pub async fn run(
    conn: &Connection,
    config: &PixiscopeConfig,
    options: &ConsoleOptions,
    stop: &StopHandle,
) -> Result<()> {
    let Some(session) = conn.session() else {
        bail!("console output requires a browser connection (not available with --simulate)");
    };

    if options.clear {
        session.clear_console().await.context("failed to clear console")?;
        eprintln!("Console cleared.");
        return Ok(());
    }

    let mut stream = session.console_messages().await;
    eprintln!("Streaming console of {} (Ctrl-C to stop)...", conn.describe());
    let poll = Duration::from_millis(config.watch_interval_ms);
    while !stop.is_stopped() {
        let message = match tokio::time::timeout(poll, stream.next()).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::info!("page connection closed");
                break;
            }
            Err(_) => continue,
        };
        if !should_show(&message, options.level) {
            continue;
        }
        if options.json {
            println!("{}", serde_json::to_string(&message).context("failed to format message")?);
        } else {
            println!("{}", format_message(&message));
        }
    }
    session.close_console(stream).await;
    Ok(())
}

/// Parse a `--level` value.
pub fn parse_level(raw: &str) -> Result<ConsoleLevel, String> {
    ConsoleLevel::parse(raw).ok_or_else(|| format!("unknown level `{raw}` (debug, log, info, warn, error)"))
}
