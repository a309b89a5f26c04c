//! Boundary to the transport/decoder capability
//!
//! A session drives exactly one [`Transport`] per generation. The transport
//! does its own fetching and parsing on whatever tasks it likes, but reports
//! back only through its [`EventSink`], which queues events for the monitor
//! task tagged with the session id and generation they belong to.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::protocol::SessionId;

/// Sub-condition of a network failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    /// Connection refused, timed out, blocked, or no HTTP response at all
    NoResponse,
    /// Server answered with a non-success status
    HttpStatus(u16),
}

/// Category of a fatal failure as reported by the capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    Network(NetworkFailure),
    Media,
    Other(String),
}

/// Signals a transport delivers to its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Manifest fetched and parsed, playback can start
    ManifestReady,
    /// The current attempt is over unless recovered
    Fatal(ErrorCategory),
    /// Playback stalled waiting for data
    Stall,
    /// New media data arrived
    DataAppended,
}

/// Payload of a queued session event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Transport(TransportEvent),
    /// The delayed reload scheduled after a network failure is due
    RetryDue,
}

/// Event addressed to one generation of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub generation: u64,
    pub kind: EventKind,
}

/// Queue feeding the monitor task
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Handle a transport uses to report events for its session
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    generation: u64,
    tx: EventSender,
}

impl EventSink {
    pub fn new(session: SessionId, generation: u64, tx: EventSender) -> Self {
        Self {
            session,
            generation,
            tx,
        }
    }

    /// Queue an event. Returns false once the monitor is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let sent = self
            .tx
            .send(SessionEvent {
                session: self.session,
                generation: self.generation,
                kind: EventKind::Transport(event),
            })
            .is_ok();

        if !sent {
            tracing::trace!(session = %self.session, "Dropping event, monitor stopped");
        }
        sent
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Where decoded media ends up (a video element, a window, a null sink)
pub trait OutputSink: Send + Sync {
    fn set_muted(&self, muted: bool);

    fn request_fullscreen(&self);

    /// A new media segment is available for presentation
    fn segment_ready(&self, _uri: &str) {}
}

/// Output that only logs. Used when the embedder supplies no renderer.
#[derive(Debug)]
pub struct LogOutput {
    session: SessionId,
}

impl LogOutput {
    pub fn new(session: SessionId) -> Self {
        Self { session }
    }
}

impl OutputSink for LogOutput {
    fn set_muted(&self, muted: bool) {
        tracing::debug!(session = %self.session, muted, "Output mute changed");
    }

    fn request_fullscreen(&self) {
        tracing::debug!(session = %self.session, "Fullscreen requested");
    }

    fn segment_ready(&self, uri: &str) {
        tracing::trace!(session = %self.session, uri, "Segment ready");
    }
}

/// One playback attempt of the transport/decoder capability
pub trait Transport: Send {
    /// Begin fetching and parsing the manifest
    fn load(&mut self, url: &str);

    fn attach_output(&mut self, sink: Arc<dyn OutputSink>);

    /// Start playback once the manifest is ready
    fn play(&mut self);

    /// Resume loading after a network failure
    fn start_load(&mut self);

    /// In-place recovery after a media decoding failure
    fn recover_media_error(&mut self);

    /// Release every resource. No events may be emitted afterwards.
    fn destroy(&mut self);
}

/// Creates transports and outputs for sessions
pub trait TransportFactory: Send + Sync {
    fn create(&self, events: EventSink) -> Box<dyn Transport>;

    fn output(&self, session: SessionId) -> Arc<dyn OutputSink> {
        Arc::new(LogOutput::new(session))
    }
}
