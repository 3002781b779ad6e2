//! Target discovery over the DevTools HTTP endpoint.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

/// One entry of `/json/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    /// Absent when another debugger is already attached.
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }

    pub fn debugger_url(&self) -> Result<&str, DiscoveryError> {
        self.web_socket_debugger_url
            .as_deref()
            .ok_or_else(|| DiscoveryError::NoDebuggerUrl {
                id: self.id.clone(),
            })
    }
}

/// `/json/version` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: Option<String>,
}

/// HTTP client for a browser's DevTools endpoint.
pub struct DevtoolsEndpoint {
    client: Client,
    base_url: String,
}

impl DevtoolsEndpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_base_url(&format!("http://{host}:{port}"))
    }

    /// Create a client with a custom base URL (for testing).
    pub fn with_base_url(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, DiscoveryError> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(url = %url, "querying DevTools endpoint");
        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_connect() {
                DiscoveryError::ConnectionRefused {
                    endpoint: self.base_url.clone(),
                }
            } else {
                DiscoveryError::Http(e)
            }
        })?;
        Ok(resp.error_for_status()?.json().await?)
    }

    /// Page targets, in the order the browser lists them.
    pub async fn list_pages(&self) -> Result<Vec<TargetInfo>, DiscoveryError> {
        let targets: Vec<TargetInfo> = self.get_json("/json/list").await?;
        Ok(targets.into_iter().filter(TargetInfo::is_page).collect())
    }

    pub async fn version(&self) -> Result<BrowserVersion, DiscoveryError> {
        self.get_json("/json/version").await
    }
}

/// Pick a page target.
///
/// Without a selector the first page wins. Otherwise the selector is tried
/// as an exact target id, then as a numeric index, then as a
/// case-insensitive substring of the URL or title.
pub fn select_target<'a>(
    targets: &'a [TargetInfo],
    selector: Option<&str>,
) -> Result<&'a TargetInfo, DiscoveryError> {
    let Some(selector) = selector else {
        return targets.first().ok_or(DiscoveryError::NoTargets);
    };
    if targets.is_empty() {
        return Err(DiscoveryError::NoTargets);
    }

    if let Some(t) = targets.iter().find(|t| t.id == selector) {
        return Ok(t);
    }
    if let Ok(index) = selector.parse::<usize>() {
        if let Some(t) = targets.get(index) {
            return Ok(t);
        }
    }
    let needle = selector.to_lowercase();
    targets
        .iter()
        .find(|t| t.url.to_lowercase().contains(&needle) || t.title.to_lowercase().contains(&needle))
        .ok_or_else(|| DiscoveryError::TargetNotFound {
            selector: selector.to_string(),
        })
}
