//! Client configuration, layered file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [api]
//! base_url = "http://localhost:8000"
//! refresh_path = "/api/auth/token/refresh/"
//! request_timeout_secs = 30
//!
//! [channel]
//! endpoint = "ws://localhost:8000/"
//! reconnect_delay_ms = 3000
//! max_reconnect_attempts = 10
//!
//! [session]
//! credentials_file = "/home/me/.config/dashlink/credentials.json"
//! ```
//!
//! `channel.endpoint` is the WebSocket base the dashboard paths
//! (`ws/automations/`, `ws/dashboard/`) are resolved against.
//!
//! Environment overrides: `DASHLINK_API_URL`, `DASHLINK_WS_URL`,
//! `DASHLINK_RECONNECT_DELAY_MS`, `DASHLINK_MAX_RECONNECT_ATTEMPTS`,
//! `DASHLINK_CREDENTIALS_FILE`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::ChannelConfig;
use crate::credentials::TokenFile;
use crate::dashboard::DashboardEndpoint;
use crate::errors::{ChannelError, ConfigError};
use crate::transport::{DEFAULT_REFRESH_PATH, TransportConfig};

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "dashlink.toml";

pub const ENV_API_URL: &str = "DASHLINK_API_URL";
pub const ENV_WS_URL: &str = "DASHLINK_WS_URL";
pub const ENV_RECONNECT_DELAY_MS: &str = "DASHLINK_RECONNECT_DELAY_MS";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "DASHLINK_MAX_RECONNECT_ATTEMPTS";
pub const ENV_CREDENTIALS_FILE: &str = "DASHLINK_CREDENTIALS_FILE";

/// `[api]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_refresh_path() -> String {
    DEFAULT_REFRESH_PATH.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            refresh_path: default_refresh_path(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// `[channel]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSection {
    #[serde(default = "default_ws_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_ws_endpoint() -> String {
    "ws://localhost:8000/".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    crate::channel::DEFAULT_RECONNECT_DELAY.as_millis() as u64
}

fn default_max_reconnect_attempts() -> u32 {
    crate::channel::DEFAULT_MAX_RECONNECT_ATTEMPTS
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            endpoint: default_ws_endpoint(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// `[session]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSection {
    /// Where the credential pair is persisted. Defaults to the user config
    /// directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,
}

/// Overrides taken from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub credentials_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub channel: ChannelSection,
    #[serde(default)]
    pub session: SessionSection,
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path`, or the defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// All three layers: the file at `path` (or `dashlink.toml`), then the
    /// process environment, then `overrides`.
    pub fn resolve(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut config = Self::load_or_default(path)?;
        config.apply_env()?;
        config.apply_overrides(overrides);
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides read through `lookup`. Empty values are
    /// ignored.
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_API_URL) {
            self.api.base_url = url;
        }
        if let Some(url) = get(ENV_WS_URL) {
            self.channel.endpoint = url;
        }
        if let Some(delay) = get(ENV_RECONNECT_DELAY_MS) {
            self.channel.reconnect_delay_ms = parse_number(ENV_RECONNECT_DELAY_MS, &delay)?;
        }
        if let Some(attempts) = get(ENV_MAX_RECONNECT_ATTEMPTS) {
            self.channel.max_reconnect_attempts =
                parse_number(ENV_MAX_RECONNECT_ATTEMPTS, &attempts)?;
        }
        if let Some(file) = get(ENV_CREDENTIALS_FILE) {
            self.session.credentials_file = Some(PathBuf::from(file));
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(url) = &overrides.api_url {
            self.api.base_url = url.clone();
        }
        if let Some(url) = &overrides.ws_url {
            self.channel.endpoint = url.clone();
        }
        if let Some(file) = &overrides.credentials_file {
            self.session.credentials_file = Some(file.clone());
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        match reqwest::Url::parse(&self.api.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => warnings.push(format!(
                "api.base_url '{}' should use http or https, not '{}'",
                self.api.base_url,
                url.scheme()
            )),
            Err(e) => warnings.push(format!(
                "api.base_url '{}' is not a valid URL: {}",
                self.api.base_url, e
            )),
        }

        if !self.api.refresh_path.starts_with('/') {
            warnings.push(format!(
                "api.refresh_path '{}' should start with '/'",
                self.api.refresh_path
            ));
        }

        if self.api.request_timeout_secs == 0 {
            warnings.push("api.request_timeout_secs is 0; every request would time out".into());
        }

        if let Err(e) = DashboardEndpoint::Dashboard.channel_config(&self.channel.endpoint) {
            warnings.push(format!("channel.endpoint: {}", e));
        }

        if self.channel.max_reconnect_attempts == 0 {
            warnings.push(
                "channel.max_reconnect_attempts is 0; dropped connections will not be retried"
                    .into(),
            );
        }

        warnings
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            base_url: self.api.base_url.clone(),
            refresh_path: self.api.refresh_path.clone(),
            request_timeout: Duration::from_secs(self.api.request_timeout_secs),
        }
    }

    /// Channel settings for one dashboard endpoint.
    pub fn channel_config(&self, endpoint: &DashboardEndpoint) -> Result<ChannelConfig, ChannelError> {
        Ok(endpoint
            .channel_config(&self.channel.endpoint)?
            .with_reconnect_delay(Duration::from_millis(self.channel.reconnect_delay_ms))
            .with_max_reconnect_attempts(self.channel.max_reconnect_attempts))
    }

    /// Configured credential file, else the per-user default.
    pub fn credentials_path(&self) -> Option<PathBuf> {
        self.session
            .credentials_file
            .clone()
            .or_else(TokenFile::default_path)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{}': {}", value, e),
        })
}
