//! Configuration management
//!
//! Credentials come from an env file (`BOT_TOKEN`, `TELEGRAM_API_SERVER`);
//! tuning comes from an optional TOML file.

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use snag_core::chrome::ChromeMode;
use snag_core::{BatchConfig, ChromeConfig, FetchConfig, DEFAULT_USER_AGENT};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Credentials and endpoint for the Bot API
#[derive(Clone)]
pub struct Settings {
    pub bot_token: String,
    /// Alternate Bot API server, e.g. a self-hosted one
    pub api_url: Option<Url>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("bot_token", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl Settings {
    /// Load from `env_file` if it exists; the process environment wins
    pub fn load(env_file: &Path) -> Result<Self> {
        let file_vars = if env_file.exists() {
            let file = fs::File::open(env_file)
                .with_context(|| format!("Failed to open {}", env_file.display()))?;
            info!("Loading credentials from {}", env_file.display());
            read_env(file)?
        } else {
            debug!("{} not found, using the process environment", env_file.display());
            HashMap::new()
        };

        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| file_vars.get(key).cloned())
        })
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bot_token = lookup("BOT_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow!("BOT_TOKEN is not set"))?;

        let api_url = lookup("TELEGRAM_API_SERVER")
            .filter(|v| !v.trim().is_empty())
            .map(|v| Url::parse(v.trim()))
            .transpose()
            .context("TELEGRAM_API_SERVER is not a valid URL")?;

        Ok(Self { bot_token, api_url })
    }
}

/// Parse `KEY=VALUE` lines; `#` starts a comment and values may contain `=`
pub fn read_env(reader: impl std::io::Read) -> Result<HashMap<String, String>> {
    dotenvy::from_read_iter(reader)
        .map(|item| item.context("Malformed env file"))
        .collect()
}

/// Tuning knobs, all optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchSection,

    #[serde(default)]
    pub progress: ProgressSection,

    #[serde(default)]
    pub browser: BrowserSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Longest silence on a connection before the download fails
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Budget for one download inside a batch
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
            task_timeout_secs: default_task_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSection {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSection {
    /// "auto", "bundled", "system" or "none"
    #[serde(default = "default_mode")]
    pub mode: String,

    #[serde(default)]
    pub chrome_path: Option<PathBuf>,

    /// How long to wait for `document.readyState == "complete"`
    #[serde(default = "default_page_ready")]
    pub page_ready_secs: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            chrome_path: None,
            page_ready_secs: default_page_ready(),
        }
    }
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_timeout() -> u64 {
    600
}
fn default_task_timeout() -> u64 {
    900
}
fn default_interval() -> u64 {
    10
}
fn default_mode() -> String {
    "auto".to_string()
}
fn default_page_ready() -> u64 {
    5
}

impl Config {
    /// Load `path`, or the per-user config file, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::config_path().filter(|p| p.exists()),
        };

        match path {
            Some(path) => {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let config = toml::from_str(&content)
                    .with_context(|| format!("Invalid config in {}", path.display()))?;
                info!("Loaded config from {}", path.display());
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "snag").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            user_agent: self.fetch.user_agent.clone(),
            timeout_secs: self.fetch.timeout_secs,
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            task_timeout: Duration::from_secs(self.fetch.task_timeout_secs),
            progress_interval: Duration::from_secs(self.progress.interval_secs.max(1)),
        }
    }

    pub fn chrome_config(&self) -> Result<ChromeConfig> {
        let mode: ChromeMode = self.browser.mode.parse().map_err(|e: String| anyhow!(e))?;
        Ok(ChromeConfig {
            mode,
            chrome_path: self.browser.chrome_path.clone(),
            ..Default::default()
        })
    }

    pub fn page_ready(&self) -> Duration {
        Duration::from_secs(self.browser.page_ready_secs)
    }
}
