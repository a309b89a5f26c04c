//! Lifecycle of a single feed
//!
//! ```text
//!            connect / refresh
//!   Idle ───────────────────────► Loading ◄──────────────┐
//!                                   │                    │ retry (same generation)
//!                     ManifestReady │                    │ or refresh (new generation)
//!                                   ▼                    │
//!                   Stall  ┌──── Playing ────┐  Fatal    │
//!                 ┌────────┘        ▲        └────────► Error
//!                 ▼                 │ DataAppended       ▲
//!             Buffering ────────────┘                    │
//!                 └──────────────── Fatal ───────────────┘
//! ```
//!
//! A media error is recovered in place: the next `ManifestReady` or
//! `DataAppended` moves the session from `Error` back to `Playing`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::failure::{FailureKind, Recovery};
use super::retry::RetryTimer;
use super::transport::{
    ErrorCategory, EventKind, EventSender, EventSink, OutputSink, SessionEvent, Transport,
    TransportEvent, TransportFactory,
};
use crate::config::{ServerConfig, SessionSettings};
use crate::manifest::build_manifest_url;
use crate::protocol::{SessionId, SessionSnapshot, SessionStatus, StreamKey};

/// Everything a session needs from its owner to (re)connect
pub struct SessionContext {
    pub server: Arc<ServerConfig>,
    pub factory: Arc<dyn TransportFactory>,
    pub events: EventSender,
    pub retry_delay: Duration,
    pub max_consecutive_retries: Option<u32>,
}

impl SessionContext {
    pub fn new(
        server: Arc<ServerConfig>,
        factory: Arc<dyn TransportFactory>,
        events: EventSender,
        settings: &SessionSettings,
    ) -> Self {
        Self {
            server,
            factory,
            events,
            retry_delay: settings.retry_delay(),
            max_consecutive_retries: settings.max_consecutive_retries,
        }
    }
}

/// One monitored feed and its current playback attempt
pub struct PlaybackSession {
    id: SessionId,
    stream_key: StreamKey,
    manifest_url: String,
    status: SessionStatus,
    error: Option<FailureKind>,
    elapsed_seconds: u64,
    is_muted: bool,
    is_pinned: bool,
    is_recording: bool,
    generation: u64,
    created_at: DateTime<Utc>,
    consecutive_retries: u32,
    transport: Option<Box<dyn Transport>>,
    output: Arc<dyn OutputSink>,
    retry: Option<RetryTimer>,
}

impl PlaybackSession {
    /// Create an idle session. Call [`connect`](Self::connect) to start it.
    pub fn new(stream_key: StreamKey, context: &SessionContext) -> Self {
        let id = SessionId::new();
        Self {
            id,
            stream_key,
            manifest_url: String::new(),
            status: SessionStatus::Idle,
            error: None,
            elapsed_seconds: 0,
            is_muted: true,
            is_pinned: false,
            is_recording: false,
            generation: 0,
            created_at: Utc::now(),
            consecutive_retries: 0,
            transport: None,
            output: context.factory.output(id),
            retry: None,
        }
    }

    /// Start a playback attempt for the current generation
    pub fn connect(&mut self, context: &SessionContext) {
        self.release();

        self.manifest_url = build_manifest_url(&context.server, &self.stream_key);
        self.status = SessionStatus::Loading;
        self.elapsed_seconds = 0;
        self.error = None;

        let sink = EventSink::new(self.id, self.generation, context.events.clone());
        let mut transport = context.factory.create(sink);
        transport.attach_output(self.output.clone());
        self.output.set_muted(self.is_muted);
        transport.load(&self.manifest_url);
        self.transport = Some(transport);

        info!(
            session = %self.id,
            key = %self.stream_key,
            generation = self.generation,
            url = %self.manifest_url,
            "Loading stream"
        );
    }

    /// Tear down the current attempt and start a new generation
    pub fn refresh(&mut self, context: &SessionContext) {
        self.release();
        self.generation += 1;
        self.consecutive_retries = 0;
        info!(session = %self.id, generation = self.generation, "Refreshing stream");
        self.connect(context);
    }

    /// Apply a queued event. Returns true if the session changed.
    ///
    /// Network failures schedule their retry on the current tokio runtime.
    /// Outside a runtime the session stays in `Error` until refreshed.
    pub fn handle_event(
        &mut self,
        context: &SessionContext,
        generation: u64,
        kind: EventKind,
    ) -> bool {
        if generation != self.generation {
            debug!(
                session = %self.id,
                event_generation = generation,
                generation = self.generation,
                "Ignoring event from superseded generation"
            );
            return false;
        }

        match kind {
            EventKind::Transport(event) => self.on_transport_event(context, event),
            EventKind::RetryDue => self.on_retry_due(),
        }
    }

    fn on_transport_event(&mut self, context: &SessionContext, event: TransportEvent) -> bool {
        match (event, self.status) {
            (TransportEvent::ManifestReady, SessionStatus::Loading) => {
                if let Some(transport) = self.transport.as_mut() {
                    transport.play();
                }
                self.status = SessionStatus::Playing;
                self.consecutive_retries = 0;
                info!(session = %self.id, key = %self.stream_key, "Playing");
                true
            }
            (TransportEvent::Stall, SessionStatus::Playing) => {
                self.status = SessionStatus::Buffering;
                debug!(session = %self.id, "Buffering");
                true
            }
            (TransportEvent::DataAppended, SessionStatus::Buffering) => {
                self.status = SessionStatus::Playing;
                debug!(session = %self.id, "Resumed after buffering");
                true
            }
            (
                TransportEvent::ManifestReady | TransportEvent::DataAppended,
                SessionStatus::Error,
            ) if self.error == Some(FailureKind::MediaDecode) => {
                if let Some(transport) = self.transport.as_mut() {
                    transport.play();
                }
                self.status = SessionStatus::Playing;
                self.error = None;
                info!(session = %self.id, key = %self.stream_key, "Recovered from media error");
                true
            }
            (TransportEvent::Fatal(category), _) => self.fail(context, category),
            (event, status) => {
                trace!(session = %self.id, ?event, %status, "Signal has no effect");
                false
            }
        }
    }

    fn fail(&mut self, context: &SessionContext, category: ErrorCategory) -> bool {
        if !matches!(
            self.status,
            SessionStatus::Loading | SessionStatus::Playing | SessionStatus::Buffering
        ) {
            debug!(session = %self.id, status = %self.status, ?category, "Ignoring fatal error");
            return false;
        }

        let kind = FailureKind::classify(&category);
        self.status = SessionStatus::Error;
        self.error = Some(kind);
        warn!(
            session = %self.id,
            key = %self.stream_key,
            ?category,
            "Stream failed: {}",
            kind
        );

        match kind.recovery() {
            Recovery::RetryAfterDelay => self.schedule_retry(context),
            Recovery::RecoverMedia => {
                if let Some(transport) = self.transport.as_mut() {
                    transport.recover_media_error();
                }
            }
            Recovery::Manual => {}
        }
        true
    }

    fn schedule_retry(&mut self, context: &SessionContext) {
        if let Some(limit) = context.max_consecutive_retries {
            if self.consecutive_retries >= limit {
                warn!(session = %self.id, limit, "Automatic retries exhausted");
                return;
            }
        }

        let event = SessionEvent {
            session: self.id,
            generation: self.generation,
            kind: EventKind::RetryDue,
        };
        // Replacing a pending timer cancels it
        self.retry = RetryTimer::schedule(context.retry_delay, event, context.events.clone());
        if self.retry.is_none() {
            warn!(session = %self.id, "No tokio runtime, retry not scheduled");
            return;
        }
        self.consecutive_retries += 1;
        debug!(
            session = %self.id,
            delay_ms = context.retry_delay.as_millis() as u64,
            attempt = self.consecutive_retries,
            "Retry scheduled"
        );
    }

    fn on_retry_due(&mut self) -> bool {
        if self.retry.take().is_none() || self.status != SessionStatus::Error {
            debug!(session = %self.id, status = %self.status, "Dropping retry");
            return false;
        }

        if let Some(transport) = self.transport.as_mut() {
            transport.start_load();
        }
        self.status = SessionStatus::Loading;
        self.elapsed_seconds = 0;
        self.error = None;
        info!(session = %self.id, generation = self.generation, "Retrying stream");
        true
    }

    /// Advance the elapsed counter by one unit while playing
    pub fn tick(&mut self) -> bool {
        if self.status == SessionStatus::Playing {
            self.elapsed_seconds += 1;
            true
        } else {
            false
        }
    }

    pub fn toggle_mute(&mut self) {
        self.is_muted = !self.is_muted;
        self.output.set_muted(self.is_muted);
    }

    pub fn toggle_pin(&mut self) {
        self.is_pinned = !self.is_pinned;
    }

    /// Flag only, nothing is captured
    pub fn toggle_record(&mut self) {
        self.is_recording = !self.is_recording;
    }

    pub fn request_fullscreen(&self) {
        self.output.request_fullscreen();
    }

    /// Cancel the pending retry and destroy the transport
    pub fn teardown(&mut self) {
        if self.transport.is_some() {
            debug!(session = %self.id, generation = self.generation, "Tearing down session");
        }
        self.release();
    }

    fn release(&mut self) {
        if let Some(timer) = self.retry.take() {
            timer.cancel();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.destroy();
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            stream_key: self.stream_key.clone(),
            manifest_url: self.manifest_url.clone(),
            status: self.status,
            error_message: self.error_message(),
            elapsed_seconds: self.elapsed_seconds,
            is_muted: self.is_muted,
            is_pinned: self.is_pinned,
            is_recording: self.is_recording,
            generation: self.generation,
            created_at: self.created_at,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn stream_key(&self) -> &StreamKey {
        &self.stream_key
    }

    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn error(&self) -> Option<FailureKind> {
        self.error
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.map(|kind| kind.to_string())
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn is_pinned(&self) -> bool {
        self.is_pinned
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn has_pending_retry(&self) -> bool {
        self.retry.is_some()
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.id)
            .field("stream_key", &self.stream_key)
            .field("status", &self.status)
            .field("error", &self.error)
            .field("generation", &self.generation)
            .field("is_pinned", &self.is_pinned)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::transport::NetworkFailure;
    use crate::test_support::{mock_context, Call, MockFactory};
    use tokio::time::Instant;

    fn fatal(category: ErrorCategory) -> EventKind {
        EventKind::Transport(TransportEvent::Fatal(category))
    }

    fn signal(event: TransportEvent) -> EventKind {
        EventKind::Transport(event)
    }

    fn no_response() -> EventKind {
        fatal(ErrorCategory::Network(NetworkFailure::NoResponse))
    }

    fn started(key: &str, factory: &Arc<MockFactory>) -> (PlaybackSession, SessionContext) {
        let (context, _rx) = mock_context(factory);
        let mut session = PlaybackSession::new(StreamKey::new(key).unwrap(), &context);
        session.connect(&context);
        (session, context)
    }

    #[test]
    fn test_new_session_defaults() {
        let factory = MockFactory::new();
        let (context, _rx) = mock_context(&factory);
        let session = PlaybackSession::new(StreamKey::new("x").unwrap(), &context);

        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.is_muted());
        assert!(!session.is_pinned());
        assert!(!session.is_recording());
        assert_eq!(session.generation(), 0);
        assert_eq!(factory.transport_count(), 0);
    }

    #[test]
    fn test_connect_loads_built_url() {
        let factory = MockFactory::new();
        let (session, _context) = started("drone1", &factory);

        assert_eq!(session.status(), SessionStatus::Loading);
        assert_eq!(session.manifest_url(), "https://localhost/live/drone1.m3u8");
        assert_eq!(
            factory.calls(session.id(), 0),
            vec![
                Call::AttachOutput,
                Call::Load("https://localhost/live/drone1.m3u8".to_string())
            ]
        );
        assert_eq!(factory.mute_history(session.id()), vec![true]);
    }

    #[test]
    fn test_playing_buffering_cycle() {
        let factory = MockFactory::new();
        let (mut session, context) = started("a", &factory);

        // Not buffering yet, resume is a no-op
        assert!(!session.handle_event(&context, 0, signal(TransportEvent::DataAppended)));
        assert!(!session.handle_event(&context, 0, signal(TransportEvent::Stall)));
        assert_eq!(session.status(), SessionStatus::Loading);

        assert!(session.handle_event(&context, 0, signal(TransportEvent::ManifestReady)));
        assert_eq!(session.status(), SessionStatus::Playing);
        assert!(factory.calls(session.id(), 0).contains(&Call::Play));

        assert!(session.handle_event(&context, 0, signal(TransportEvent::Stall)));
        assert_eq!(session.status(), SessionStatus::Buffering);
        assert!(session.handle_event(&context, 0, signal(TransportEvent::DataAppended)));
        assert_eq!(session.status(), SessionStatus::Playing);
        assert!(!session.handle_event(&context, 0, signal(TransportEvent::DataAppended)));
        assert_eq!(session.error(), None);
    }

    #[test]
    fn test_elapsed_counts_only_while_playing() {
        let factory = MockFactory::new();
        let (mut session, context) = started("a", &factory);

        assert!(!session.tick());
        session.handle_event(&context, 0, signal(TransportEvent::ManifestReady));
        for _ in 0..5 {
            session.tick();
        }
        assert_eq!(session.elapsed_seconds(), 5);

        session.handle_event(&context, 0, signal(TransportEvent::Stall));
        session.tick();
        assert_eq!(session.elapsed_seconds(), 5);

        session.refresh(&context);
        assert_eq!(session.elapsed_seconds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_schedules_retry_on_same_generation() {
        let factory = MockFactory::new();
        let (context, mut rx) = mock_context(&factory);
        let mut session = PlaybackSession::new(StreamKey::new("x").unwrap(), &context);
        session.connect(&context);

        let start = Instant::now();
        assert!(session.handle_event(&context, 0, no_response()));
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(
            session.error_message().as_deref(),
            Some("CORS or Connection Error")
        );
        assert!(session.has_pending_retry());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session, session.id());
        assert_eq!(event.generation, 0);
        assert_eq!(event.kind, EventKind::RetryDue);
        assert!(start.elapsed() >= Duration::from_secs(3));

        assert!(session.handle_event(&context, event.generation, event.kind));
        assert_eq!(session.status(), SessionStatus::Loading);
        assert_eq!(session.error(), None);
        assert_eq!(session.generation(), 0);
        assert_eq!(factory.transport_count(), 1);
        assert_eq!(factory.calls(session.id(), 0).last(), Some(&Call::StartLoad));
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_failures_are_retried() {
        for (status, message) in [(404, "Stream Not Found (404)"), (500, "Network Error")] {
            let factory = MockFactory::new();
            let (mut session, context) = started("x", &factory);
            session.handle_event(&context, 0, signal(TransportEvent::ManifestReady));

            let category = ErrorCategory::Network(NetworkFailure::HttpStatus(status));
            assert!(session.handle_event(&context, 0, fatal(category)));
            assert_eq!(session.error_message().as_deref(), Some(message));
            assert!(session.has_pending_retry());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_error_recovers_in_place() {
        let factory = MockFactory::new();
        let (context, mut rx) = mock_context(&factory);
        let mut session = PlaybackSession::new(StreamKey::new("x").unwrap(), &context);
        session.connect(&context);
        session.handle_event(&context, 0, signal(TransportEvent::ManifestReady));

        assert!(session.handle_event(&context, 0, fatal(ErrorCategory::Media)));
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(session.error_message().as_deref(), Some("Media Error"));
        assert!(!session.has_pending_retry());
        assert_eq!(
            factory.calls(session.id(), 0).last(),
            Some(&Call::RecoverMediaError)
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_media_error_clears_when_transport_recovers() {
        let factory = MockFactory::new();
        let (mut session, context) = started("x", &factory);
        session.handle_event(&context, 0, signal(TransportEvent::ManifestReady));
        session.handle_event(&context, 0, fatal(ErrorCategory::Media));

        assert!(session.handle_event(&context, 0, signal(TransportEvent::ManifestReady)));
        assert_eq!(session.status(), SessionStatus::Playing);
        assert_eq!(session.error(), None);
        assert_eq!(factory.calls(session.id(), 0).last(), Some(&Call::Play));

        // Already playing, further data is a no-op
        assert!(!session.handle_event(&context, 0, signal(TransportEvent::DataAppended)));
        for _ in 0..5 {
            session.tick();
        }
        assert_eq!(session.elapsed_seconds(), 5);
    }

    #[test]
    fn test_appended_data_also_ends_media_error() {
        let factory = MockFactory::new();
        let (mut session, context) = started("x", &factory);
        session.handle_event(&context, 0, signal(TransportEvent::ManifestReady));
        session.handle_event(&context, 0, fatal(ErrorCategory::Media));

        assert!(session.handle_event(&context, 0, signal(TransportEvent::DataAppended)));
        assert_eq!(session.status(), SessionStatus::Playing);
        assert_eq!(session.error_message(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_ignore_late_signals() {
        let factory = MockFactory::new();
        let (mut session, context) = started("x", &factory);
        session.handle_event(&context, 0, no_response());

        assert!(!session.handle_event(&context, 0, signal(TransportEvent::ManifestReady)));
        assert!(!session.handle_event(&context, 0, signal(TransportEvent::DataAppended)));
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(session.has_pending_retry());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_error_waits_for_refresh() {
        let factory = MockFactory::new();
        let (mut session, context) = started("x", &factory);

        let category = ErrorCategory::Other("key system".to_string());
        assert!(session.handle_event(&context, 0, fatal(category)));
        assert_eq!(session.error_message().as_deref(), Some("Stream Error"));
        assert!(!session.has_pending_retry());
        assert_eq!(
            factory.calls(session.id(), 0),
            vec![
                Call::AttachOutput,
                Call::Load("https://localhost/live/x.m3u8".to_string())
            ]
        );

        session.refresh(&context);
        assert_eq!(session.status(), SessionStatus::Loading);
        assert_eq!(session.error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_in_error_state_is_ignored() {
        let factory = MockFactory::new();
        let (mut session, context) = started("x", &factory);

        session.handle_event(&context, 0, fatal(ErrorCategory::Media));
        assert!(!session.handle_event(&context, 0, no_response()));
        assert_eq!(session.error(), Some(FailureKind::MediaDecode));
        assert!(!session.has_pending_retry());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_transport_and_cancels_retry() {
        let factory = MockFactory::new();
        let (context, mut rx) = mock_context(&factory);
        let mut session = PlaybackSession::new(StreamKey::new("x").unwrap(), &context);
        session.connect(&context);
        session.handle_event(&context, 0, no_response());
        assert!(session.has_pending_retry());

        session.refresh(&context);
        assert_eq!(session.generation(), 1);
        assert_eq!(session.status(), SessionStatus::Loading);
        assert!(!session.has_pending_retry());
        assert_eq!(factory.calls(session.id(), 0).last(), Some(&Call::Destroy));
        assert_eq!(
            factory.calls(session.id(), 1),
            vec![
                Call::AttachOutput,
                Call::Load("https://localhost/live/x.m3u8".to_string())
            ]
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stale_generation_events_are_ignored() {
        let factory = MockFactory::new();
        let (mut session, context) = started("x", &factory);
        session.refresh(&context);

        assert!(!session.handle_event(&context, 0, signal(TransportEvent::ManifestReady)));
        assert_eq!(session.status(), SessionStatus::Loading);
        assert!(!session.handle_event(&context, 0, EventKind::RetryDue));

        assert!(session.handle_event(&context, 1, signal(TransportEvent::ManifestReady)));
        assert_eq!(session.status(), SessionStatus::Playing);
    }

    #[test]
    fn test_refresh_uses_current_server_config() {
        let factory = MockFactory::new();
        let (mut session, mut context) = started("x", &factory);

        context.server = Arc::new(ServerConfig {
            host: "backup.example.net".to_string(),
            ..ServerConfig::default()
        });
        session.refresh(&context);

        assert_eq!(session.manifest_url(), "https://backup.example.net/live/x.m3u8");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_retry() {
        let factory = MockFactory::new();
        let (context, mut rx) = mock_context(&factory);
        let mut session = PlaybackSession::new(StreamKey::new("x").unwrap(), &context);
        session.connect(&context);
        session.handle_event(&context, 0, no_response());
        let id = session.id();

        drop(session);
        assert_eq!(factory.calls(id, 0).last(), Some(&Call::Destroy));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_limit() {
        let factory = MockFactory::new();
        let (mut context, mut rx) = mock_context(&factory);
        context.max_consecutive_retries = Some(1);
        let mut session = PlaybackSession::new(StreamKey::new("x").unwrap(), &context);
        session.connect(&context);

        session.handle_event(&context, 0, no_response());
        let event = rx.recv().await.unwrap();
        session.handle_event(&context, event.generation, event.kind);
        assert_eq!(session.status(), SessionStatus::Loading);

        session.handle_event(&context, 0, no_response());
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(!session.has_pending_retry());
    }

    #[test]
    fn test_network_failure_outside_runtime_waits_for_refresh() {
        let factory = MockFactory::new();
        let (mut session, context) = started("x", &factory);

        assert!(session.handle_event(&context, 0, no_response()));
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(!session.has_pending_retry());

        session.refresh(&context);
        assert_eq!(session.status(), SessionStatus::Loading);
    }

    #[test]
    fn test_side_channel_controls() {
        let factory = MockFactory::new();
        let (mut session, _context) = started("x", &factory);

        session.toggle_mute();
        session.toggle_mute();
        assert!(session.is_muted());
        assert_eq!(factory.mute_history(session.id()), vec![true, false, true]);

        session.toggle_pin();
        session.toggle_record();
        assert!(session.is_pinned());
        assert!(session.is_recording());

        session.request_fullscreen();
        assert_eq!(factory.fullscreen_requests(session.id()), 1);
        assert_eq!(session.status(), SessionStatus::Loading);
    }
}
