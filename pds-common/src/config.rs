//! Configuration loading and resolution
//!
//! Values are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or unreadable config file never aborts startup; it is logged and
//! the compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Backend used when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Environment variable overriding the backend base URL
pub const API_URL_ENV: &str = "PDS_API_URL";

/// Delay between a processing trigger and the follow-up stats reload
pub const DEFAULT_RELOAD_DELAY_MS: u64 = 2000;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub session_file: Option<PathBuf>,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub reload_delay_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[stream]` section
///
/// `reconnect = false` keeps the stream closed after the first transport error.
/// `reconnect = true` retries with exponential backoff between the two bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default)]
    pub reconnect: bool,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect: false,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Platform config file location (`~/.config/pds/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pds").join("config.toml"))
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Load the config file if present, falling back to defaults
///
/// An explicit path that cannot be read is warned about; a missing default
/// file is normal and only logged at debug level.
pub fn load_or_default(explicit: Option<&Path>) -> TomlConfig {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                debug!("No config file found, using defaults");
                return TomlConfig::default();
            }
        },
    };

    match load_toml_config(&path) {
        Ok(config) => {
            debug!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Config file {} ignored: {}", path.display(), e);
            TomlConfig::default()
        }
    }
}

/// Resolve the backend base URL (CLI → ENV → TOML → default)
pub fn resolve_api_url(cli_arg: Option<&str>, toml_config: &TomlConfig) -> String {
    let from_env = std::env::var(API_URL_ENV).ok();
    let url = cli_arg
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .or(from_env.filter(|s| !s.trim().is_empty()))
        .or_else(|| toml_config.api_url.clone().filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    url.trim().trim_end_matches('/').to_string()
}

/// Durable location of the persisted identity
pub fn default_session_file() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("pds").join("session.json"))
        .unwrap_or_else(|| PathBuf::from("./pds_data/session.json"))
}

/// Where downloaded photos and archives are saved
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}
