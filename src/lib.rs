//! # Feed Monitor
//!
//! Session manager for watching up to ten concurrent live HLS feeds
//! (drone cameras, field encoders) side by side.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                        PRESENTATION ADAPTER (external)                       │
//! │     add keys │ remove │ pin │ mute │ record │ fullscreen │ refresh           │
//! └──────────────────────────────────┬──────────────────────────────────────────┘
//!                                    │ MonitorHandle (mpsc + oneshot)
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                    Monitor task (sessions::monitor)                          │
//! │   select! { commands, capability events, elapsed tick }                     │
//! │  ┌──────────────────────────────────────────────────────────────────────┐  │
//! │  │            Session Collection (sessions::collection)  cap = 10       │  │
//! │  │  ┌──────────┐   ┌──────────┐   ┌──────────┐          ┌──────────┐   │  │
//! │  │  │ Session  │   │ Session  │   │ Session  │   ...    │ Session  │   │  │
//! │  │  │  gen 0   │   │  gen 2   │   │  gen 0   │          │  gen 1   │   │  │
//! │  │  └────┬─────┘   └────┬─────┘   └────┬─────┘          └────┬─────┘   │  │
//! │  └───────┼──────────────┼──────────────┼─────────────────────┼─────────┘  │
//! └──────────┼──────────────┼──────────────┼─────────────────────┼────────────┘
//!            │ load(url)    │              │                     │
//!            ▼              ▼              ▼                     ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │        Transport capability (playback::transport / playback::hls)           │
//! │   one instance per session, own tasks, events back through EventSink       │
//! └─────────────────────────────────────────────────────────────────────────────┘
//!            │ ManifestReady │ Fatal(category) │ Stall │ DataAppended
//!            └──────────────────────► (session id, generation) ──► Monitor task
//! ```
//!
//! Every mutation of session state happens on the monitor task. Capability
//! events and retry timers are tagged with the generation that produced them,
//! and anything from a superseded generation is dropped.

pub mod config;
pub mod error;
pub mod manifest;
pub mod playback;
pub mod protocol;
pub mod sessions;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result, SessionError};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Maximum number of concurrently monitored feeds
    pub const MAX_SESSIONS: usize = 10;

    /// Delay before an automatic reload after a network failure
    pub const RETRY_DELAY: Duration = Duration::from_secs(3);

    /// Interval of the elapsed-time counter
    pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

    /// Separator accepted between stream keys in free-text input
    pub const KEY_SEPARATOR: char = ',';

    /// File extension of an HLS manifest
    pub const MANIFEST_EXTENSION: &str = "m3u8";

    /// Default HTTP timeout for manifest requests
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
}
