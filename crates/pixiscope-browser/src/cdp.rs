//! Low-level CDP (Chrome DevTools Protocol) WebSocket client.
//!
//! Connects to a page's DevTools WebSocket endpoint and provides JSON-RPC
//! command/response correlation plus event delivery to subscribers keyed by
//! event method name.
//!
//! This module handles:
//! - WebSocket connection management
//! - Command ID generation and request/response correlation
//! - Event dispatching to per-method subscriptions
//! - Timeout handling for commands

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::BrowserError;

/// Timeout applied by [`CdpClient::send_command`].
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>;

/// A CDP event received from the browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// The event method name (e.g. "Runtime.consoleAPICalled").
    pub method: String,
    /// The event parameters.
    pub params: Value,
}

#[derive(Debug, Clone, serde::Serialize)]
struct CdpCommand {
    id: u64,
    method: String,
    params: Value,
}

/// A CDP response from the browser.
#[derive(Debug, Clone)]
pub struct CdpResponse {
    /// The command ID this response correlates to.
    pub id: u64,
    /// The result value on success.
    pub result: Option<Value>,
    /// The error object on failure.
    pub error: Option<CdpResponseError>,
}

/// Error object in a CDP response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
    pub data: Option<String>,
}

// ---------------------------------------------------------------------------
// Event dispatch
// ---------------------------------------------------------------------------

/// Routes events to the subscribers registered for their method name.
#[derive(Debug, Default)]
struct EventDispatcher {
    next_id: u64,
    listeners: HashMap<String, Vec<(u64, mpsc::UnboundedSender<CdpEvent>)>>,
}

impl EventDispatcher {
    fn add(&mut self, method: &str) -> (u64, mpsc::UnboundedReceiver<CdpEvent>) {
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .entry(method.to_string())
            .or_default()
            .push((self.next_id, tx));
        (self.next_id, rx)
    }

    fn remove(&mut self, id: u64) -> bool {
        let mut removed = false;
        self.listeners.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|(sub_id, _)| *sub_id != id);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        removed
    }

    /// Deliver an event; returns how many subscribers received it.
    /// Subscribers whose receiver was dropped are forgotten.
    fn dispatch(&mut self, event: &CdpEvent) -> usize {
        let Some(subs) = self.listeners.get_mut(&event.method) else {
            return 0;
        };
        subs.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        let delivered = subs.len();
        if subs.is_empty() {
            self.listeners.remove(&event.method);
        }
        delivered
    }

    fn clear(&mut self) {
        self.listeners.clear();
    }
}

/// A stream of events for one method name.
///
/// Dropping the subscription stops delivery the next time an event for its
/// method arrives; [`CdpClient::unsubscribe`] stops it immediately.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    method: String,
    rx: mpsc::UnboundedReceiver<CdpEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait for the next event. `None` once the connection is gone or the
    /// subscription was removed.
    pub async fn recv(&mut self) -> Option<CdpEvent> {
        self.rx.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<CdpEvent> {
        self.rx.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// CdpClient
// ---------------------------------------------------------------------------

/// Low-level CDP client that manages a WebSocket connection to Chrome DevTools.
///
/// Commands are sent with auto-incrementing IDs and responses are correlated
/// back to the caller. Events are handed to the subscriptions registered for
/// their method name and dropped when nobody listens.
pub struct CdpClient {
    next_id: Arc<AtomicU64>,
    /// Pending commands awaiting responses: id -> oneshot sender.
    pending: PendingMap,
    writer: Arc<Mutex<WsSink>>,
    dispatcher: Arc<Mutex<EventDispatcher>>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a Chrome DevTools WebSocket endpoint.
    ///
    /// The `ws_url` is normally a target's `webSocketDebuggerUrl`, of the form
    /// `ws://localhost:{port}/devtools/page/{target_id}`.
    pub async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        tracing::info!(url = ws_url, "connecting to Chrome DevTools WebSocket");

        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| BrowserError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;

        let (writer, reader) = ws_stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let dispatcher = Arc::new(Mutex::new(EventDispatcher::default()));

        let reader_handle = tokio::spawn(Self::read_loop(
            reader,
            Arc::clone(&pending),
            Arc::clone(&dispatcher),
        ));

        tracing::info!(url = ws_url, "CDP WebSocket connection established");

        Ok(Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending,
            writer: Arc::new(Mutex::new(writer)),
            dispatcher,
            _reader_handle: reader_handle,
        })
    }

    /// Send a CDP command and wait for its response using
    /// [`DEFAULT_COMMAND_TIMEOUT`].
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.send_command_with_timeout(method, params, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    /// Send a CDP command with a custom timeout.
    ///
    /// A CDP-level error in the response is returned as
    /// [`BrowserError::CdpError`].
    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let cmd = CdpCommand {
            id,
            method: method.to_string(),
            params,
        };

        let json = serde_json::to_string(&cmd).map_err(|e| BrowserError::Protocol {
            detail: format!("failed to serialize command: {e}"),
        })?;

        tracing::debug!(id, method, "sending CDP command");

        // Register before sending so a fast reply cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let sent = {
            let mut writer = self.writer.lock().await;
            writer.send(Message::Text(json.into())).await
        };
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(BrowserError::Protocol {
                detail: format!("failed to send WebSocket message: {e}"),
            });
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(BrowserError::Protocol {
                    detail: "response channel closed unexpectedly".to_string(),
                })
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(BrowserError::Timeout {
                    method: method.to_string(),
                    duration: timeout,
                });
            }
        };

        if let Some(err) = response.error {
            return Err(BrowserError::CdpError {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Enable a CDP domain (e.g. "Runtime", "Log").
    ///
    /// Most domains emit no events until enabled.
    pub async fn enable_domain(&self, domain: &str) -> Result<(), BrowserError> {
        let method = format!("{domain}.enable");
        self.send_command(&method, serde_json::json!({})).await?;
        Ok(())
    }

    /// Start receiving events named `method`.
    pub async fn subscribe(&self, method: &str) -> Subscription {
        let (id, rx) = self.dispatcher.lock().await.add(method);
        tracing::debug!(id, method, "subscribed to CDP event");
        Subscription {
            id,
            method: method.to_string(),
            rx,
        }
    }

    /// Stop delivery to a subscription. Returns whether it was registered.
    pub async fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.dispatcher.lock().await.remove(id);
        tracing::debug!(id, removed, "unsubscribed from CDP event");
        removed
    }

    /// Background task that reads WebSocket messages and dispatches them.
    ///
    /// - Messages with an `id` field are responses to pending commands.
    /// - Messages with a `method` field (and no `id`) are events.
    async fn read_loop(
        mut reader: SplitStream<WsStream>,
        pending: PendingMap,
        dispatcher: Arc<Mutex<EventDispatcher>>,
    ) {
        while let Some(msg_result) = reader.next().await {
            let msg = match msg_result {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket read error, stopping reader");
                    break;
                }
            };

            let text = match msg {
                Message::Text(t) => t.to_string(),
                Message::Binary(b) => match String::from_utf8(b.to_vec()) {
                    Ok(s) => s,
                    Err(_) => continue,
                },
                Message::Close(_) => {
                    tracing::info!("WebSocket closed by remote");
                    break;
                }
                _ => continue,
            };

            let json: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse CDP message as JSON");
                    continue;
                }
            };

            if let Some(response) = parse_cdp_response(&json) {
                let id = response.id;
                match pending.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!(id, "received response for unknown command ID"),
                }
            } else if let Some(event) = parse_cdp_event(&json) {
                let delivered = dispatcher.lock().await.dispatch(&event);
                tracing::trace!(method = %event.method, delivered, "CDP event");
            }
        }

        // Fail every outstanding command and end every subscription.
        dispatcher.lock().await.clear();
        let mut pending_guard = pending.lock().await;
        for (id, tx) in pending_guard.drain() {
            let _ = tx.send(CdpResponse {
                id,
                result: None,
                error: Some(CdpResponseError {
                    code: -1,
                    message: "WebSocket connection closed".to_string(),
                    data: None,
                }),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// CDP protocol helpers
// ---------------------------------------------------------------------------

/// Build a CDP JSON-RPC message.
pub fn build_cdp_message(id: u64, method: &str, params: Value) -> Value {
    serde_json::json!({
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Parse a CDP response JSON into its components.
pub fn parse_cdp_response(json: &Value) -> Option<CdpResponse> {
    let id = json.get("id")?.as_u64()?;
    Some(CdpResponse {
        id,
        result: json.get("result").cloned(),
        error: json
            .get("error")
            .and_then(|e| serde_json::from_value(e.clone()).ok()),
    })
}

/// Parse a CDP event JSON into its components.
pub fn parse_cdp_event(json: &Value) -> Option<CdpEvent> {
    if json.get("id").is_some() {
        return None;
    }
    let method = json.get("method")?.as_str()?.to_string();
    let params = json.get("params").cloned().unwrap_or(Value::Null);
    Some(CdpEvent { method, params })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
