//! Classification of fatal playback failures

use serde::Serialize;
use thiserror::Error;

use super::transport::{ErrorCategory, NetworkFailure};

/// Failure class of a playback attempt.
///
/// The Display text is the message shown on the feed's tile.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    #[error("CORS or Connection Error")]
    Connectivity,

    #[error("Stream Not Found (404)")]
    NotFound,

    #[error("Network Error")]
    NetworkOther,

    #[error("Media Error")]
    MediaDecode,

    #[error("Stream Error")]
    Unclassified,
}

/// What a session does on its own after a fatal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Reload once after the configured delay, same generation
    RetryAfterDelay,
    /// Ask the capability to recover in place, right away
    RecoverMedia,
    /// Wait for a manual refresh
    Manual,
}

impl FailureKind {
    pub fn classify(category: &ErrorCategory) -> Self {
        match category {
            ErrorCategory::Network(NetworkFailure::NoResponse) => FailureKind::Connectivity,
            ErrorCategory::Network(NetworkFailure::HttpStatus(404)) => FailureKind::NotFound,
            ErrorCategory::Network(NetworkFailure::HttpStatus(_)) => FailureKind::NetworkOther,
            ErrorCategory::Media => FailureKind::MediaDecode,
            ErrorCategory::Other(_) => FailureKind::Unclassified,
        }
    }

    pub fn recovery(self) -> Recovery {
        match self {
            FailureKind::Connectivity | FailureKind::NotFound | FailureKind::NetworkOther => {
                Recovery::RetryAfterDelay
            }
            FailureKind::MediaDecode => Recovery::RecoverMedia,
            FailureKind::Unclassified => Recovery::Manual,
        }
    }
}
