//! Chrome/Chromium discovery and launch with remote debugging enabled.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::DiscoveryError;
use crate::targets::{BrowserVersion, DevtoolsEndpoint};

/// How long to wait for a launched browser's DevTools endpoint.
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Well-known Chrome/Chromium binary paths for the current platform.
pub fn platform_candidate_paths() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    }

    #[cfg(target_os = "linux")]
    {
        &[
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium-browser",
            "/usr/bin/chromium",
            "/snap/bin/chromium",
            "/usr/lib/chromium/chromium",
        ]
    }

    #[cfg(target_os = "windows")]
    {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        &[]
    }
}

/// Reject configured paths that traverse directories.
pub fn validate_binary_path(path: &Path) -> Result<(), DiscoveryError> {
    if path.components().any(|c| c == std::path::Component::ParentDir) {
        return Err(DiscoveryError::InvalidBinaryPath {
            path: path.to_string_lossy().into_owned(),
            reason: "path contains directory traversal (..)".to_string(),
        });
    }
    Ok(())
}

/// Find a browser binary. A configured path wins when it exists; otherwise
/// the first existing platform candidate is used.
pub fn find_chrome(configured: Option<&Path>) -> Result<PathBuf, DiscoveryError> {
    if let Some(path) = configured {
        validate_binary_path(path)?;
        if path.exists() {
            tracing::info!(path = %path.display(), "using configured browser binary");
            return Ok(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "configured browser binary does not exist");
    }

    platform_candidate_paths()
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(|p| {
            tracing::debug!(path = %p.display(), "found browser candidate");
            p.to_path_buf()
        })
        .ok_or(DiscoveryError::NoChromeFound)
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub port: u16,
    pub headless: bool,
    pub url: Option<String>,
    pub chrome_path: Option<PathBuf>,
    /// Profile directory; a per-port directory under the system temp dir
    /// when unset.
    pub user_data_dir: Option<PathBuf>,
}

impl LaunchOptions {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            headless: false,
            url: None,
            chrome_path: None,
            user_data_dir: None,
        }
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.user_data_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("pixiscope-profile-{}", self.port)))
    }
}

/// Command-line arguments for a debuggable browser.
pub fn build_launch_args(options: &LaunchOptions) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", options.port),
        format!("--user-data-dir={}", options.profile_dir().display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }
    if let Some(url) = &options.url {
        args.push(url.clone());
    }
    args
}

/// A browser started by [`launch`]. It keeps running after this value is
/// dropped.
#[derive(Debug)]
pub struct LaunchedBrowser {
    pub binary: PathBuf,
    pub pid: u32,
    pub version: BrowserVersion,
    _child: Child,
}

/// Start a browser and wait until its DevTools endpoint answers.
pub async fn launch(options: &LaunchOptions) -> Result<LaunchedBrowser, DiscoveryError> {
    let binary = find_chrome(options.chrome_path.as_deref())?;
    let args = build_launch_args(options);
    tracing::info!(binary = %binary.display(), port = options.port, "launching browser");

    let child = Command::new(&binary)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    let endpoint = DevtoolsEndpoint::new("127.0.0.1", options.port);
    let version = wait_for_endpoint(&endpoint, options.port, LAUNCH_TIMEOUT).await?;
    tracing::info!(browser = %version.browser, "browser is accepting DevTools connections");

    Ok(LaunchedBrowser {
        binary,
        pid: child.id(),
        version,
        _child: child,
    })
}

/// Poll `/json/version` until it answers or `timeout` elapses.
pub async fn wait_for_endpoint(
    endpoint: &DevtoolsEndpoint,
    port: u16,
    timeout: Duration,
) -> Result<BrowserVersion, DiscoveryError> {
    let started = Instant::now();
    loop {
        match endpoint.version().await {
            Ok(version) => return Ok(version),
            Err(e) if started.elapsed() < timeout => {
                tracing::debug!(error = %e, "DevTools endpoint not up yet");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(_) => {
                return Err(DiscoveryError::LaunchTimeout {
                    port,
                    duration: timeout,
                })
            }
        }
    }
}
