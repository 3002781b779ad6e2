//! The page the CLI talks to: a live browser tab over CDP, or the built-in
//! simulated application.

use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use pixiscope_browser::{select_target, BrowserError, DevtoolsEndpoint, PageSession, TargetInfo};
use pixiscope_probe::agent::{self, Agent, Method};
use pixiscope_probe::sim::{SimApp, SimOptions, FRAME_INTERVAL_MS};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::PixiscopeConfig;

/// Frames the simulated application runs before the first command, enough
/// for one frame-rate sample.
const SIMULATED_WARMUP_FRAMES: usize = 90;

/// A decoded agent reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Ok(T),
    /// The agent answered with `{error: ...}`.
    Error(String),
}

/// Split an agent reply into a value or its `{error}` payload.
pub fn decode_reply<T: DeserializeOwned>(value: Value) -> Result<Reply<T>> {
    if let Some(message) = error_payload(&value) {
        return Ok(Reply::Error(message.to_string()));
    }
    let decoded = serde_json::from_value(value).context("unexpected reply shape from page agent")?;
    Ok(Reply::Ok(decoded))
}

fn error_payload(value: &Value) -> Option<&str> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object.get("error")?.as_str()
}

/// Benchmarks keep the page busy for their whole duration, so their
/// evaluation gets that much longer than the usual command timeout.
fn call_timeout(method: Method, args: &[Value], config: &PixiscopeConfig) -> Duration {
    let base = config.command_timeout();
    match (method, args.first().and_then(Value::as_f64)) {
        (Method::Benchmark, Some(ms)) if ms.is_finite() && ms > 0.0 && ms <= 3_600_000.0 => {
            base + Duration::from_secs_f64(ms / 1000.0)
        }
        _ => base,
    }
}

pub enum Connection {
    Cdp {
        session: PageSession,
        target: TargetInfo,
    },
    Simulated {
        app: SimApp,
        agent: Rc<Agent>,
    },
}

impl Connection {
    /// Attach to the configured page target.
    pub async fn open(config: &PixiscopeConfig) -> Result<Self> {
        let endpoint = DevtoolsEndpoint::new(&config.host, config.port);
        let targets = endpoint.list_pages().await?;
        let target = select_target(&targets, config.target.as_deref())?.clone();
        Self::attach(target, config).await
    }

    /// Open a debugging session on one page target. The agent is installed
    /// on first use.
    pub async fn attach(target: TargetInfo, config: &PixiscopeConfig) -> Result<Self> {
        tracing::info!(id = %target.id, url = %target.url, "attaching to page");
        let session = PageSession::connect(target.debugger_url()?, config.command_timeout())
            .await
            .with_context(|| format!("failed to attach to page {}", target.url))?;
        Ok(Connection::Cdp { session, target })
    }

    /// Start the simulated application with the agent installed.
    pub fn simulated() -> Self {
        let app = SimApp::new(SimOptions::default());
        let agent = Agent::install(app.realm());
        app.run_frames(SIMULATED_WARMUP_FRAMES);
        tracing::info!(frames = SIMULATED_WARMUP_FRAMES, "simulated application running");
        Connection::Simulated { app, agent }
    }

    pub fn describe(&self) -> String {
        match self {
            Connection::Cdp { target, .. } => format!("{} ({})", target.title, target.url),
            Connection::Simulated { .. } => "simulated application".to_string(),
        }
    }

    pub fn session(&self) -> Option<&PageSession> {
        match self {
            Connection::Cdp { session, .. } => Some(session),
            Connection::Simulated { .. } => None,
        }
    }

    /// Let time pass in the page. A live page runs on its own; the simulated
    /// one renders the frames that fit in `millis`.
    pub fn advance(&self, millis: u64) {
        if let Connection::Simulated { app, .. } = self {
            let frames = (millis as f64 / FRAME_INTERVAL_MS).round().max(1.0) as usize;
            app.run_frames(frames);
        }
    }

    async fn evaluate(&self, expression: &str, timeout: Duration) -> Result<Value, BrowserError> {
        match self {
            Connection::Cdp { session, .. } => session.evaluate_with_timeout(expression, timeout).await,
            Connection::Simulated { app, .. } => match agent::evaluate(app.realm(), expression) {
                Ok(Some(value)) => Ok(value),
                Ok(None) => Err(BrowserError::NotReady),
                Err(thrown) => Err(BrowserError::JsException {
                    message: thrown.message,
                }),
            },
        }
    }

    /// Evaluate the agent script in a live page once per connection.
    async fn install_agent(&self) -> Result<()> {
        if let Connection::Cdp { session, .. } = self {
            let injected = session
                .inject_once(agent::AGENT_SCRIPT)
                .await
                .context("failed to install the page agent")?;
            if injected {
                tracing::info!(namespace = agent::NAMESPACE, "page agent installed");
            }
        }
        Ok(())
    }

    /// Call an agent method. A live page that lost the agent (it navigated
    /// since the agent was installed) gets it again and the call is retried
    /// once.
    pub async fn call(&self, method: Method, args: &[Value], config: &PixiscopeConfig) -> Result<Value> {
        self.install_agent().await?;
        let value = self.call_once(method, args, config).await?;
        match self {
            Connection::Cdp { session, .. } if error_payload(&value) == Some(agent::AGENT_MISSING) => {
                tracing::info!(method = %method, "page agent missing, reinstalling");
                session.forget_injection();
                self.install_agent().await?;
                self.call_once(method, args, config).await
            }
            _ => Ok(value),
        }
    }

    /// Evaluate one agent call, retrying while the page runtime is not ready.
    async fn call_once(&self, method: Method, args: &[Value], config: &PixiscopeConfig) -> Result<Value> {
        let expression = match self {
            Connection::Cdp { .. } => agent::guarded_call_expression(method, args),
            Connection::Simulated { .. } => agent::call_expression(method, args),
        };
        let timeout = call_timeout(method, args, config);
        let attempts = config.ready_retries.max(1);
        for attempt in 1..=attempts {
            match self.evaluate(&expression, timeout).await {
                Ok(value) => return Ok(value),
                Err(BrowserError::NotReady) if attempt < attempts => {
                    tracing::debug!(method = %method, attempt, "page runtime not ready, retrying");
                    tokio::time::sleep(config.ready_retry_delay()).await;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("{method} failed"));
                }
            }
        }
        bail!("{method} failed: page runtime never became ready")
    }

    /// Call an agent method and decode its reply.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: Method,
        args: &[Value],
        config: &PixiscopeConfig,
    ) -> Result<Reply<T>> {
        decode_reply(self.call(method, args, config).await?)
    }
}
