//! `targets` and `launch`: commands that talk to the browser, not the page.

use anyhow::Result;
use pixiscope_browser::launch::{self, LaunchOptions};
use pixiscope_browser::{DevtoolsEndpoint, TargetInfo};
use serde::Serialize;

use super::print_json;
use crate::config::PixiscopeConfig;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TargetRow<'a> {
    index: usize,
    id: &'a str,
    title: &'a str,
    url: &'a str,
    attachable: bool,
}

fn rows(targets: &[TargetInfo]) -> Vec<TargetRow<'_>> {
    targets
        .iter()
        .enumerate()
        .map(|(index, t)| TargetRow {
            index,
            id: &t.id,
            title: &t.title,
            url: &t.url,
            attachable: t.web_socket_debugger_url.is_some(),
        })
        .collect()
}

/// `pixiscope targets`: list page targets with the index `--target` accepts.
pub async fn targets(config: &PixiscopeConfig) -> Result<()> {
    let endpoint = DevtoolsEndpoint::new(&config.host, config.port);
    let pages = endpoint.list_pages().await?;
    print_json(&rows(&pages))
}

/// `pixiscope launch`: start a debuggable browser on the configured port.
pub async fn launch(config: &PixiscopeConfig, headless: bool, url: Option<String>) -> Result<()> {
    let options = LaunchOptions {
        headless,
        url,
        chrome_path: config.chrome_path.clone(),
        ..LaunchOptions::new(config.port)
    };
    let browser = launch::launch(&options).await?;
    print_json(&serde_json::json!({
        "binary": browser.binary.display().to_string(),
        "pid": browser.pid,
        "port": options.port,
        "browser": browser.version.browser,
        "profile": options.profile_dir().display().to_string(),
    }))
}
