//! Per-feed playback sessions
//!
//! A [`PlaybackSession`] runs the lifecycle of one feed on top of an injected
//! [`Transport`], classifies its failures and recovers from the ones that
//! can be recovered automatically.

pub mod failure;
#[cfg(feature = "hls")]
pub mod hls;
pub mod retry;
pub mod session;
pub mod transport;

pub use failure::{FailureKind, Recovery};
#[cfg(feature = "hls")]
pub use hls::{HlsTransport, HlsTransportFactory};
pub use retry::RetryTimer;
pub use session::{PlaybackSession, SessionContext};
pub use transport::{
    ErrorCategory, EventKind, EventSender, EventSink, LogOutput, NetworkFailure, OutputSink,
    SessionEvent, Transport, TransportEvent, TransportFactory,
};
