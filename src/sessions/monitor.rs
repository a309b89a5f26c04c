//! Monitor task and its handle
//!
//! The monitor owns the [`SessionCollection`] and is the only place session
//! state is mutated. User commands, capability events and the elapsed tick
//! are all serialised through one `select!` loop, and the ordered view is
//! republished on a watch channel after every change.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::collection::SessionCollection;
use crate::config::{AppConfig, ServerConfig};
use crate::error::{Error, Result, SessionError};
use crate::playback::{SessionContext, SessionEvent, TransportFactory};
use crate::protocol::{AddOutcome, SessionId, SessionSnapshot};

const COMMAND_QUEUE: usize = 64;

/// Per-session user intents that do not change membership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    TogglePin,
    ToggleMute,
    ToggleRecord,
    Fullscreen,
    Refresh,
}

enum Command {
    AddKeys {
        raw: String,
        reply: oneshot::Sender<AddOutcome>,
    },
    Remove {
        id: SessionId,
        reply: oneshot::Sender<bool>,
    },
    Control {
        id: SessionId,
        action: Control,
        reply: oneshot::Sender<std::result::Result<(), SessionError>>,
    },
    UpdateServer {
        server: ServerConfig,
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Event loop owning the session collection
pub struct Monitor {
    collection: SessionCollection,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    snapshots: watch::Sender<Vec<SessionSnapshot>>,
    tick_interval: Duration,
}

impl Monitor {
    pub fn new(config: &AppConfig, factory: Arc<dyn TransportFactory>) -> (Self, MonitorHandle) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (snapshot_tx, snapshot_rx) = watch::channel(Vec::new());

        let context = SessionContext::new(
            Arc::new(config.server.clone()),
            factory,
            event_tx,
            &config.sessions,
        );
        let monitor = Self {
            collection: SessionCollection::new(context, config.sessions.capacity()),
            commands: command_rx,
            events: event_rx,
            snapshots: snapshot_tx,
            tick_interval: config.sessions.tick_interval(),
        };
        let handle = MonitorHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        };
        (monitor, handle)
    }

    /// Create a monitor and run it on the current tokio runtime
    pub fn spawn(
        config: &AppConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> (MonitorHandle, JoinHandle<()>) {
        let (monitor, handle) = Self::new(config, factory);
        (handle, tokio::spawn(monitor.run()))
    }

    pub async fn run(mut self) {
        // Shared by all sessions, see `SessionCollection::tick`
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        info!(
            capacity = self.collection.capacity(),
            host = %self.collection.server().host,
            "Monitor started"
        );

        loop {
            let changed = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => {
                        self.handle_command(command);
                        false
                    }
                },
                Some(event) = self.events.recv() => self.collection.dispatch(event),
                _ = ticker.tick() => self.collection.tick(),
            };

            if changed {
                self.publish();
            }
        }

        // Dropping the sessions cancels their retries and destroys transports
        let remaining = self.collection.len();
        drop(self.collection);
        self.snapshots.send_replace(Vec::new());
        info!(sessions = remaining, "Monitor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddKeys { raw, reply } => {
                let outcome = self.collection.add_keys(&raw);
                self.publish();
                let _ = reply.send(outcome);
            }
            Command::Remove { id, reply } => {
                let removed = self.collection.remove_session(id);
                self.publish();
                let _ = reply.send(removed);
            }
            Command::Control { id, action, reply } => {
                let result = match action {
                    Control::TogglePin => self.collection.toggle_pin(id),
                    Control::ToggleMute => self.collection.toggle_mute(id),
                    Control::ToggleRecord => self.collection.toggle_record(id),
                    Control::Fullscreen => self.collection.request_fullscreen(id),
                    Control::Refresh => self.collection.refresh(id),
                };
                if let Err(e) = &result {
                    debug!(?action, error = %e, "Control rejected");
                }
                self.publish();
                let _ = reply.send(result);
            }
            Command::UpdateServer { server, reply } => {
                self.collection.set_server(Arc::new(server));
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.collection.snapshot());
    }
}

/// Cloneable handle used by the presentation adapter
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Vec<SessionSnapshot>>,
}

impl MonitorHandle {
    /// Submit comma-separated stream keys
    pub async fn add_keys(&self, raw: impl Into<String>) -> Result<AddOutcome> {
        let raw = raw.into();
        self.request(|reply| Command::AddKeys { raw, reply }).await
    }

    /// Remove a session. Returns false if it was already gone.
    pub async fn remove(&self, id: SessionId) -> Result<bool> {
        self.request(|reply| Command::Remove { id, reply }).await
    }

    pub async fn toggle_pin(&self, id: SessionId) -> Result<()> {
        self.control(id, Control::TogglePin).await
    }

    pub async fn toggle_mute(&self, id: SessionId) -> Result<()> {
        self.control(id, Control::ToggleMute).await
    }

    pub async fn toggle_record(&self, id: SessionId) -> Result<()> {
        self.control(id, Control::ToggleRecord).await
    }

    pub async fn request_fullscreen(&self, id: SessionId) -> Result<()> {
        self.control(id, Control::Fullscreen).await
    }

    pub async fn refresh(&self, id: SessionId) -> Result<()> {
        self.control(id, Control::Refresh).await
    }

    /// Apply new server settings from the settings form.
    ///
    /// Sessions pick them up on their next refresh; new keys use them at once.
    pub async fn update_server(&self, server: ServerConfig) -> Result<()> {
        self.request(|reply| Command::UpdateServer { server, reply }).await
    }

    /// Current ordered view of all sessions
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified whenever the view changes
    pub fn subscribe(&self) -> watch::Receiver<Vec<SessionSnapshot>> {
        self.snapshots.clone()
    }

    /// Stop the monitor and tear down every session
    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| Error::MonitorClosed)
    }

    async fn control(&self, id: SessionId, action: Control) -> Result<()> {
        self.request(|reply| Command::Control { id, action, reply })
            .await?
            .map_err(Error::from)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::MonitorClosed)?;
        response.await.map_err(|_| Error::MonitorClosed)
    }
}
