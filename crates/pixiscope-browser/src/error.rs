//! Error types for the pixiscope-browser crate.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to a page over CDP.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Failed to establish a WebSocket connection to Chrome DevTools.
    #[error("failed to connect to Chrome DevTools at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A CDP command returned an error response.
    #[error("CDP error {code}: {message}")]
    CdpError {
        code: i64,
        message: String,
        data: Option<String>,
    },

    /// A CDP command timed out waiting for a response.
    #[error("CDP command '{method}' timed out after {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// A protocol-level error (serialization, unexpected message format, etc.).
    #[error("CDP protocol error: {detail}")]
    Protocol { detail: String },

    /// Evaluation threw inside the page.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },

    /// Evaluation produced no value, usually because the page's execution
    /// context is still being created.
    #[error("page runtime not ready (evaluation returned undefined)")]
    NotReady,
}

/// Errors raised while discovering or launching a browser.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Nothing is listening on the DevTools port.
    #[error("connection refused at {endpoint}")]
    ConnectionRefused { endpoint: String },

    #[error("DevTools HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no page targets available")]
    NoTargets,

    #[error("no page target matches `{selector}`")]
    TargetNotFound { selector: String },

    /// The target is already attached to another debugger.
    #[error("target {id} exposes no WebSocket debugger URL")]
    NoDebuggerUrl { id: String },

    #[error("no Chrome or Chromium binary found on this system")]
    NoChromeFound,

    #[error("invalid binary path `{path}`: {reason}")]
    InvalidBinaryPath { path: String, reason: String },

    #[error("failed to launch browser: {0}")]
    Launch(#[from] std::io::Error),

    #[error("browser did not answer on port {port} within {duration:?}")]
    LaunchTimeout { port: u16, duration: Duration },
}

impl DiscoveryError {
    /// Whether the failure means no browser is listening at all.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, DiscoveryError::ConnectionRefused { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_message() {
        assert!(BrowserError::NotReady.to_string().contains("not ready"));
    }

    #[test]
    fn test_connection_refused_detection() {
        let err = DiscoveryError::ConnectionRefused {
            endpoint: "http://localhost:9222".into(),
        };
        assert!(err.is_connection_refused());
        assert!(!DiscoveryError::NoTargets.is_connection_refused());
        assert_eq!(err.to_string(), "connection refused at http://localhost:9222");
    }
}
