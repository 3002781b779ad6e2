//! Hierarchical configuration loading.
//!
//! The priority chain (later overrides earlier):
//! 1. Built-in defaults ([`PixiscopeConfig::default()`])
//! 2. User-level: `~/.config/pixiscope/config.toml`
//! 3. Workspace-level: `./.pixiscope.toml`
//! 4. `PIXISCOPE_*` environment variables
//! 5. CLI flags (applied by the caller through [`CliOverrides`])

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Config files larger than this are rejected.
const MAX_CONFIG_FILE_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixiscopeConfig {
    pub host: String,
    pub port: u16,
    /// Page selector: target id, index, or URL/title substring.
    pub target: Option<String>,
    pub command_timeout_secs: u64,
    /// Attempts made while the page reports no value yet.
    pub ready_retries: u32,
    pub ready_retry_delay_ms: u64,
    pub watch_interval_ms: u64,
    pub benchmark_duration_ms: u64,
    pub chrome_path: Option<PathBuf>,
}

impl Default for PixiscopeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9222,
            target: None,
            command_timeout_secs: 30,
            ready_retries: 5,
            ready_retry_delay_ms: 200,
            watch_interval_ms: 1000,
            benchmark_duration_ms: 5000,
            chrome_path: None,
        }
    }
}

impl PixiscopeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn ready_retry_delay(&self) -> Duration {
        Duration::from_millis(self.ready_retry_delay_ms)
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub target: Option<String>,
}

/// Environment variables and the config keys they set.
const ENV_MAPPINGS: &[(&str, &str)] = &[
    ("PIXISCOPE_HOST", "host"),
    ("PIXISCOPE_PORT", "port"),
    ("PIXISCOPE_TARGET", "target"),
];

pub struct ConfigLoader {
    user_path: Option<PathBuf>,
    workspace_path: PathBuf,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            user_path: std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config/pixiscope/config.toml")),
            workspace_path: PathBuf::from(".pixiscope.toml"),
        }
    }

    #[must_use]
    pub fn with_user_path(mut self, path: PathBuf) -> Self {
        self.user_path = Some(path);
        self
    }

    #[must_use]
    pub fn with_workspace_path(mut self, path: PathBuf) -> Self {
        self.workspace_path = path;
        self
    }

    /// Load and merge all sources using the process environment.
    pub fn load(&self, cli: &CliOverrides) -> Result<PixiscopeConfig> {
        self.load_with_env(cli, |name| std::env::var(name).ok())
    }

    /// Load and merge all sources, reading environment variables through
    /// `env`.
    pub fn load_with_env(
        &self,
        cli: &CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<PixiscopeConfig> {
        let mut merged = toml::Value::try_from(PixiscopeConfig::default())
            .context("failed to serialize default config")?;

        let files = self.user_path.iter().chain(std::iter::once(&self.workspace_path));
        for path in files {
            if !path.exists() {
                continue;
            }
            let content = read_config_file(path)?;
            let layer: toml::Value = toml::from_str(&content)
                .with_context(|| format!("invalid config file {}", path.display()))?;
            merge(&mut merged, layer);
            tracing::debug!(path = %path.display(), "loaded config file");
        }

        apply_env_overrides(&mut merged, env)?;

        let mut config: PixiscopeConfig = merged
            .try_into()
            .context("failed to parse merged config")?;

        if let Some(host) = &cli.host {
            config.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(target) = &cli.target {
            config.target = Some(target.clone());
        }
        Ok(config)
    }
}

/// Read a config file, enforcing the size limit.
fn read_config_file(path: &Path) -> Result<String> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        bail!(
            "config file {} exceeds maximum size of {} bytes (actual: {} bytes)",
            path.display(),
            MAX_CONFIG_FILE_SIZE,
            metadata.len()
        );
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    if content.contains('\0') {
        bail!("config file {} contains null bytes", path.display());
    }
    Ok(content)
}

/// Overlay top-level keys of `layer` onto `base`.
fn merge(base: &mut toml::Value, layer: toml::Value) {
    if let (toml::Value::Table(base), toml::Value::Table(layer)) = (base, layer) {
        for (key, value) in layer {
            base.insert(key, value);
        }
    }
}

fn apply_env_overrides(merged: &mut toml::Value, env: impl Fn(&str) -> Option<String>) -> Result<()> {
    let Some(table) = merged.as_table_mut() else {
        return Ok(());
    };
    for (var, key) in ENV_MAPPINGS {
        let Some(raw) = env(var) else { continue };
        if raw.is_empty() {
            continue;
        }
        let value = if *key == "port" {
            let port: u16 = raw
                .parse()
                .with_context(|| format!("environment variable {var} is not a valid port: {raw}"))?;
            toml::Value::Integer(i64::from(port))
        } else {
            toml::Value::String(raw)
        };
        table.insert((*key).to_string(), value);
    }
    Ok(())
}
