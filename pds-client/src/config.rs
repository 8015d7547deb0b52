//! pds-client configuration: CLI overrides layered over `config.toml`

use crate::stream::ReconnectPolicy;
use pds_common::config::{
    default_download_dir, default_session_file, resolve_api_url, TomlConfig,
    DEFAULT_RELOAD_DELAY_MS, DEFAULT_REQUEST_TIMEOUT_SECS,
};
use std::path::PathBuf;
use std::time::Duration;

/// Values given on the command line (highest priority)
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub session_file: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
    /// Force stream reconnection on regardless of the config file
    pub reconnect: bool,
}

/// Fully resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub session_file: PathBuf,
    pub download_dir: PathBuf,
    pub reload_delay: Duration,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub log_level: String,
}

impl ClientConfig {
    pub fn resolve(overrides: &Overrides, toml_config: &TomlConfig) -> Self {
        let mut stream = toml_config.stream.clone();
        stream.reconnect |= overrides.reconnect;

        Self {
            api_url: resolve_api_url(overrides.api_url.as_deref(), toml_config),
            session_file: overrides
                .session_file
                .clone()
                .or_else(|| toml_config.session_file.clone())
                .unwrap_or_else(default_session_file),
            download_dir: overrides
                .download_dir
                .clone()
                .or_else(|| toml_config.download_dir.clone())
                .unwrap_or_else(default_download_dir),
            reload_delay: Duration::from_millis(
                toml_config.reload_delay_ms.unwrap_or(DEFAULT_RELOAD_DELAY_MS),
            ),
            request_timeout: Duration::from_secs(
                toml_config
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            reconnect: ReconnectPolicy::from_settings(&stream),
            log_level: toml_config.logging.level.clone(),
        }
    }
}
