//! A debugging session attached to one page target.
//!
//! Wraps a [`CdpClient`] with the operations pixiscope needs: bootstrap
//! script injection, one-shot expression evaluation and the page's console
//! output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cdp::{CdpClient, CdpEvent, Subscription};
use crate::error::BrowserError;

/// Event carrying `console.*` calls made by page scripts.
pub const CONSOLE_API_EVENT: &str = "Runtime.consoleAPICalled";
/// Event carrying browser-side log entries (network errors, violations...).
pub const LOG_ENTRY_EVENT: &str = "Log.entryAdded";

// ---------------------------------------------------------------------------
// Console messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Debug,
    Log,
    Info,
    Warn,
    Error,
}

impl ConsoleLevel {
    /// Map a CDP level or console API type onto a level.
    pub fn from_cdp(kind: &str) -> Self {
        match kind {
            "debug" | "verbose" | "trace" | "profile" | "profileEnd" => ConsoleLevel::Debug,
            "info" => ConsoleLevel::Info,
            "warning" | "warn" => ConsoleLevel::Warn,
            "error" | "assert" => ConsoleLevel::Error,
            _ => ConsoleLevel::Log,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "debug" => Some(ConsoleLevel::Debug),
            "log" => Some(ConsoleLevel::Log),
            "info" => Some(ConsoleLevel::Info),
            "warn" | "warning" => Some(ConsoleLevel::Warn),
            "error" => Some(ConsoleLevel::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Log => "log",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of console output, from either event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub text: String,
    /// `console-api` for script calls, otherwise the Log domain's source
    /// (`network`, `javascript`, `violation`...).
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// CDP timestamps are milliseconds since the epoch, as floats.
fn timestamp_from_millis(value: Option<&Value>) -> DateTime<Utc> {
    value
        .and_then(Value::as_f64)
        .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
        .unwrap_or_else(Utc::now)
}

/// Render one `Runtime.RemoteObject` argument the way a console would.
fn remote_object_text(arg: &Value) -> String {
    match arg.get("value") {
        Some(Value::String(s)) => s.clone(),
        Some(v) if !v.is_null() || arg.get("subtype").and_then(Value::as_str) == Some("null") => {
            v.to_string()
        }
        _ => arg
            .get("description")
            .and_then(Value::as_str)
            .or_else(|| arg.get("type").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string(),
    }
}

/// Parse `Runtime.consoleAPICalled` parameters.
pub fn parse_console_api_called(params: &Value) -> ConsoleMessage {
    let kind = params.get("type").and_then(Value::as_str).unwrap_or("log");
    let text = params
        .get("args")
        .and_then(Value::as_array)
        .map(|args| {
            args.iter()
                .map(remote_object_text)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    ConsoleMessage {
        level: ConsoleLevel::from_cdp(kind),
        text,
        source: "console-api".to_string(),
        timestamp: timestamp_from_millis(params.get("timestamp")),
    }
}

/// Parse `Log.entryAdded` parameters.
pub fn parse_log_entry(params: &Value) -> ConsoleMessage {
    let entry = params.get("entry").unwrap_or(&Value::Null);
    let mut text = entry
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if let Some(url) = entry.get("url").and_then(Value::as_str) {
        if !url.is_empty() {
            text = format!("{text} ({url})");
        }
    }
    ConsoleMessage {
        level: ConsoleLevel::from_cdp(entry.get("level").and_then(Value::as_str).unwrap_or("info")),
        text,
        source: entry
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("other")
            .to_string(),
        timestamp: timestamp_from_millis(entry.get("timestamp")),
    }
}

/// Convert either console event into a message.
pub fn console_message_from_event(event: &CdpEvent) -> Option<ConsoleMessage> {
    match event.method.as_str() {
        CONSOLE_API_EVENT => Some(parse_console_api_called(&event.params)),
        LOG_ENTRY_EVENT => Some(parse_log_entry(&event.params)),
        _ => None,
    }
}

/// Merged console output of a page, in arrival order per stream.
pub struct ConsoleStream {
    runtime: Subscription,
    log: Subscription,
}

impl ConsoleStream {
    /// Wait for the next message from either stream. `None` once both
    /// streams have ended.
    pub async fn next(&mut self) -> Option<ConsoleMessage> {
        loop {
            let event = tokio::select! {
                Some(event) = self.runtime.recv() => event,
                Some(event) = self.log.recv() => event,
                else => return None,
            };
            if let Some(message) = console_message_from_event(&event) {
                return Some(message);
            }
        }
    }

    pub fn subscription_ids(&self) -> [u64; 2] {
        [self.runtime.id(), self.log.id()]
    }
}

// ---------------------------------------------------------------------------
// PageSession
// ---------------------------------------------------------------------------

/// A CDP connection to one page with the `Runtime` and `Log` domains enabled.
pub struct PageSession {
    client: CdpClient,
    command_timeout: Duration,
    injected: AtomicBool,
}

impl PageSession {
    /// Connect to a page's WebSocket debugger URL and enable the domains
    /// evaluation and console capture depend on.
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self, BrowserError> {
        let client = CdpClient::connect(ws_url).await?;
        client.enable_domain("Runtime").await?;
        client.enable_domain("Log").await?;
        Ok(Self {
            client,
            command_timeout,
            injected: AtomicBool::new(false),
        })
    }

    pub fn client(&self) -> &CdpClient {
        &self.client
    }

    /// Evaluate an expression in the page and return its value by copy.
    ///
    /// A thrown exception is [`BrowserError::JsException`]; an undefined
    /// result is [`BrowserError::NotReady`].
    pub async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        self.evaluate_with_timeout(expression, self.command_timeout)
            .await
    }

    /// [`evaluate`](Self::evaluate) for expressions expected to run longer
    /// than the session's command timeout.
    pub async fn evaluate_with_timeout(
        &self,
        expression: &str,
        timeout: Duration,
    ) -> Result<Value, BrowserError> {
        let response = self
            .client
            .send_command_with_timeout("Runtime.evaluate", build_evaluate_params(expression), timeout)
            .await?;
        parse_evaluate_response(&response)
    }

    /// Evaluate a bootstrap script unless this session already has. Returns
    /// whether the script was evaluated. The script must be safe to run
    /// twice, since a page that navigated needs it again.
    pub async fn inject_once(&self, script: &str) -> Result<bool, BrowserError> {
        if self.injected.load(Ordering::Acquire) {
            return Ok(false);
        }
        let response = self
            .client
            .send_command("Runtime.evaluate", build_evaluate_params(script))
            .await?;
        match parse_evaluate_response(&response) {
            Ok(_) | Err(BrowserError::NotReady) => {}
            Err(err) => return Err(err),
        }
        self.injected.store(true, Ordering::Release);
        tracing::debug!(bytes = script.len(), "bootstrap script injected");
        Ok(true)
    }

    /// Make the next [`inject_once`](Self::inject_once) evaluate again, for
    /// pages that navigated and lost their globals.
    pub fn forget_injection(&self) {
        self.injected.store(false, Ordering::Release);
    }

    /// Begin collecting console output. Only messages emitted after this
    /// call are seen.
    pub async fn console_messages(&self) -> ConsoleStream {
        ConsoleStream {
            runtime: self.client.subscribe(CONSOLE_API_EVENT).await,
            log: self.client.subscribe(LOG_ENTRY_EVENT).await,
        }
    }

    /// Stop a console stream's delivery.
    pub async fn close_console(&self, stream: ConsoleStream) {
        for id in stream.subscription_ids() {
            self.client.unsubscribe(id).await;
        }
    }

    /// Clear the page's console and the browser log.
    pub async fn clear_console(&self) -> Result<(), BrowserError> {
        self.client
            .send_command("Runtime.discardConsoleEntries", serde_json::json!({}))
            .await?;
        self.client
            .send_command("Log.clear", serde_json::json!({}))
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CDP parameter builders and parsers
// ---------------------------------------------------------------------------

/// Build CDP `Runtime.evaluate` parameters.
pub fn build_evaluate_params(expression: &str) -> Value {
    serde_json::json!({
        "expression": expression,
        "returnByValue": true,
        "awaitPromise": true,
    })
}

/// Extract the value of a `Runtime.evaluate` response.
pub fn parse_evaluate_response(response: &Value) -> Result<Value, BrowserError> {
    if let Some(details) = response.get("exceptionDetails") {
        let message = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("unknown exception")
            .to_string();
        return Err(BrowserError::JsException { message });
    }

    let result = response.get("result").ok_or(BrowserError::NotReady)?;
    if result.get("type").and_then(Value::as_str) == Some("undefined") {
        return Err(BrowserError::NotReady);
    }
    result.get("value").cloned().ok_or(BrowserError::NotReady)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
