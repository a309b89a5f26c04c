//! Error types for the feed monitor

use thiserror::Error;

use crate::protocol::SessionId;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "hls")]
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Monitor is not running")]
    MonitorClosed,
}

/// Session management errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Stream key is empty")]
    EmptyKey,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
