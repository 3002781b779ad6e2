//! CLI command implementations for the `pixiscope` binary.

pub mod browser;
pub mod console;
pub mod report;
pub mod scene;
pub mod stats;

use anyhow::{Context, Result};
use serde::Serialize;

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to format output")?;
    println!("{text}");
    Ok(())
}

/// Print an agent `{error}` reply the way the agent sent it.
pub fn print_agent_error(message: &str) -> Result<()> {
    tracing::debug!(error = message, "page agent reported an error");
    print_json(&serde_json::json!({ "error": message }))
}
