//! Fixed-capacity collection of playback sessions

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::constants::{KEY_SEPARATOR, MAX_SESSIONS};
use crate::error::SessionError;
use crate::playback::{PlaybackSession, SessionContext, SessionEvent};
use crate::protocol::{AddOutcome, SessionId, SessionSnapshot, StreamKey};

/// Owns every active session, in insertion order.
///
/// Stream keys are unique and the length never exceeds the capacity.
pub struct SessionCollection {
    sessions: Vec<PlaybackSession>,
    capacity: usize,
    context: SessionContext,
}

impl SessionCollection {
    /// `capacity` is clamped to `MAX_SESSIONS`
    pub fn new(context: SessionContext, capacity: usize) -> Self {
        let capacity = capacity.min(MAX_SESSIONS);
        Self {
            sessions: Vec::with_capacity(capacity),
            capacity,
            context,
        }
    }

    /// Admit comma-separated stream keys.
    ///
    /// Keys already present (or repeated in the input) are rejected, new keys
    /// beyond the remaining capacity are dropped. Admitted sessions start
    /// loading immediately.
    pub fn add_keys(&mut self, raw: &str) -> AddOutcome {
        let mut outcome = AddOutcome::default();
        let mut seen: HashSet<StreamKey> = self
            .sessions
            .iter()
            .map(|session| session.stream_key().clone())
            .collect();

        let mut fresh = Vec::new();
        for token in raw.split(KEY_SEPARATOR) {
            let Ok(key) = StreamKey::new(token) else {
                continue;
            };
            if seen.insert(key.clone()) {
                fresh.push(key);
            } else {
                outcome.rejected_duplicates.push(key);
            }
        }

        let room = self.capacity.saturating_sub(self.sessions.len());
        if fresh.len() > room {
            outcome.dropped_over_capacity = fresh.split_off(room);
        }

        for key in fresh {
            let mut session = PlaybackSession::new(key.clone(), &self.context);
            session.connect(&self.context);
            info!(session = %session.id(), key = %key, "Session admitted");
            self.sessions.push(session);
            outcome.added.push(key);
        }

        if !outcome.rejected_duplicates.is_empty() || !outcome.dropped_over_capacity.is_empty() {
            debug!(
                duplicates = outcome.rejected_duplicates.len(),
                over_capacity = outcome.dropped_over_capacity.len(),
                "Some keys were not admitted"
            );
        }
        outcome
    }

    /// Remove a session and release its transport. Unknown ids are a no-op.
    pub fn remove_session(&mut self, id: SessionId) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };

        let mut session = self.sessions.remove(index);
        session.teardown();
        info!(session = %id, key = %session.stream_key(), "Session removed");
        true
    }

    pub fn toggle_pin(&mut self, id: SessionId) -> Result<(), SessionError> {
        self.session_mut(id)?.toggle_pin();
        Ok(())
    }

    pub fn toggle_mute(&mut self, id: SessionId) -> Result<(), SessionError> {
        self.session_mut(id)?.toggle_mute();
        Ok(())
    }

    pub fn toggle_record(&mut self, id: SessionId) -> Result<(), SessionError> {
        self.session_mut(id)?.toggle_record();
        Ok(())
    }

    pub fn request_fullscreen(&self, id: SessionId) -> Result<(), SessionError> {
        self.get(id)
            .ok_or(SessionError::NotFound(id))?
            .request_fullscreen();
        Ok(())
    }

    /// Start a new generation for a session
    pub fn refresh(&mut self, id: SessionId) -> Result<(), SessionError> {
        let session = self
            .sessions
            .iter_mut()
            .find(|session| session.id() == id)
            .ok_or(SessionError::NotFound(id))?;
        session.refresh(&self.context);
        Ok(())
    }

    /// Route a capability or timer event to its session
    pub fn dispatch(&mut self, event: SessionEvent) -> bool {
        match self
            .sessions
            .iter_mut()
            .find(|session| session.id() == event.session)
        {
            Some(session) => session.handle_event(&self.context, event.generation, event.kind),
            None => {
                debug!(session = %event.session, "Dropping event for removed session");
                false
            }
        }
    }

    /// Advance every session's elapsed counter. Returns true if any changed.
    ///
    /// One call ticks all sessions together, so a session's first increment
    /// lands anywhere within one tick interval after it starts playing.
    pub fn tick(&mut self) -> bool {
        self.sessions
            .iter_mut()
            .fold(false, |changed, session| session.tick() || changed)
    }

    /// Pinned sessions first, insertion order within each group
    pub fn ordered_view(&self) -> Vec<&PlaybackSession> {
        let mut view: Vec<&PlaybackSession> = self.sessions.iter().collect();
        view.sort_by_key(|session| !session.is_pinned());
        view
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.ordered_view()
            .into_iter()
            .map(PlaybackSession::snapshot)
            .collect()
    }

    pub fn get(&self, id: SessionId) -> Option<&PlaybackSession> {
        self.sessions.iter().find(|session| session.id() == id)
    }

    /// Sessions in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &PlaybackSession> {
        self.sessions.iter()
    }

    pub fn server(&self) -> &ServerConfig {
        &self.context.server
    }

    /// Replace the server settings used for every later (re)connect.
    ///
    /// Running sessions keep their current manifest URL until refreshed.
    pub fn set_server(&mut self, server: Arc<ServerConfig>) {
        info!(host = %server.host, path = %server.application_path, "Server settings updated");
        self.context.server = server;
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn position(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|session| session.id() == id)
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut PlaybackSession, SessionError> {
        self.sessions
            .iter_mut()
            .find(|session| session.id() == id)
            .ok_or(SessionError::NotFound(id))
    }
}
