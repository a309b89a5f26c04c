//! Configuration for the feed monitor
//!
//! Loaded once at startup from a TOML file. Every field has a default so a
//! partial (or missing) file is valid.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{DEFAULT_REQUEST_TIMEOUT, MAX_SESSIONS, RETRY_DELAY, TICK_INTERVAL};
use crate::error::{Error, Result};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sessions: SessionSettings,
    pub hls: HlsSettings,
}

impl AppConfig {
    /// Parse a configuration document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Platform config location, e.g. `~/.config/feed-monitor/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "feed-monitor")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, falling back to defaults when the file
    /// does not exist
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "Loading configuration");
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(Error::Config("server.host must not be empty".into()));
        }
        if self.sessions.capacity == 0 {
            return Err(Error::Config("sessions.capacity must be at least 1".into()));
        }
        if self.sessions.tick_interval_ms == 0 {
            return Err(Error::Config("sessions.tick_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

/// URL scheme used for manifests. Only secure HTTP is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Https => f.write_str("https"),
        }
    }
}

/// Streaming server location, shared read-only by every session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub protocol: Protocol,
    pub host: String,
    /// Only part of the manifest URL when `include_port` is set
    pub port: String,
    pub application_path: String,
    pub include_port: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Https,
            host: "localhost".to_string(),
            port: "443".to_string(),
            application_path: "live".to_string(),
            include_port: false,
        }
    }
}

/// Session lifecycle tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Clamped to `MAX_SESSIONS`
    pub capacity: usize,
    pub retry_delay_ms: u64,
    pub tick_interval_ms: u64,
    /// `None` retries network failures indefinitely
    pub max_consecutive_retries: Option<u32>,
}

impl SessionSettings {
    pub fn capacity(&self) -> usize {
        self.capacity.min(MAX_SESSIONS)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capacity: MAX_SESSIONS,
            retry_delay_ms: RETRY_DELAY.as_millis() as u64,
            tick_interval_ms: TICK_INTERVAL.as_millis() as u64,
            max_consecutive_retries: None,
        }
    }
}

/// HTTP manifest poller settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsSettings {
    pub request_timeout_ms: u64,
    /// Polls without new segments before a stall is reported
    pub stall_after: u32,
}

impl HlsSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            stall_after: 3,
        }
    }
}
