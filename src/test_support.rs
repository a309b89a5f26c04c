//! Recording transport used by unit tests

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{ServerConfig, SessionSettings};
use crate::playback::session::SessionContext;
use crate::playback::transport::{
    EventSink, OutputSink, SessionEvent, Transport, TransportEvent, TransportFactory,
};
use crate::protocol::SessionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Load(String),
    AttachOutput,
    Play,
    StartLoad,
    RecoverMediaError,
    Destroy,
}

struct TransportRecord {
    sink: EventSink,
    calls: Vec<Call>,
}

#[derive(Default)]
struct OutputRecord {
    mutes: Vec<bool>,
    fullscreen: usize,
}

#[derive(Default)]
struct Registry {
    transports: Vec<TransportRecord>,
    outputs: HashMap<SessionId, OutputRecord>,
}

/// Factory whose transports record every call made on them
#[derive(Default)]
pub struct MockFactory {
    registry: Arc<Mutex<Registry>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport_count(&self) -> usize {
        self.registry.lock().transports.len()
    }

    /// Calls made on the transport of `session` at `generation`
    pub fn calls(&self, session: SessionId, generation: u64) -> Vec<Call> {
        self.registry
            .lock()
            .transports
            .iter()
            .filter(|record| {
                record.sink.session() == session && record.sink.generation() == generation
            })
            .flat_map(|record| record.calls.clone())
            .collect()
    }

    /// Emit an event through the most recent transport of `session`
    pub fn emit(&self, session: SessionId, event: TransportEvent) -> bool {
        let sink = self
            .registry
            .lock()
            .transports
            .iter()
            .rev()
            .find(|record| record.sink.session() == session)
            .map(|record| record.sink.clone());

        sink.map(|sink| sink.emit(event)).unwrap_or(false)
    }

    pub fn mute_history(&self, session: SessionId) -> Vec<bool> {
        self.registry
            .lock()
            .outputs
            .get(&session)
            .map(|record| record.mutes.clone())
            .unwrap_or_default()
    }

    pub fn fullscreen_requests(&self, session: SessionId) -> usize {
        self.registry
            .lock()
            .outputs
            .get(&session)
            .map(|record| record.fullscreen)
            .unwrap_or(0)
    }
}

impl TransportFactory for MockFactory {
    fn create(&self, events: EventSink) -> Box<dyn Transport> {
        let mut registry = self.registry.lock();
        let index = registry.transports.len();
        registry.transports.push(TransportRecord {
            sink: events,
            calls: Vec::new(),
        });

        Box::new(MockTransport {
            index,
            registry: self.registry.clone(),
        })
    }

    fn output(&self, session: SessionId) -> Arc<dyn OutputSink> {
        self.registry.lock().outputs.entry(session).or_default();
        Arc::new(MockOutput {
            session,
            registry: self.registry.clone(),
        })
    }
}

struct MockTransport {
    index: usize,
    registry: Arc<Mutex<Registry>>,
}

impl MockTransport {
    fn record(&self, call: Call) {
        self.registry.lock().transports[self.index].calls.push(call);
    }
}

impl Transport for MockTransport {
    fn load(&mut self, url: &str) {
        self.record(Call::Load(url.to_string()));
    }

    fn attach_output(&mut self, _sink: Arc<dyn OutputSink>) {
        self.record(Call::AttachOutput);
    }

    fn play(&mut self) {
        self.record(Call::Play);
    }

    fn start_load(&mut self) {
        self.record(Call::StartLoad);
    }

    fn recover_media_error(&mut self) {
        self.record(Call::RecoverMediaError);
    }

    fn destroy(&mut self) {
        self.record(Call::Destroy);
    }
}

struct MockOutput {
    session: SessionId,
    registry: Arc<Mutex<Registry>>,
}

impl OutputSink for MockOutput {
    fn set_muted(&self, muted: bool) {
        self.registry
            .lock()
            .outputs
            .entry(self.session)
            .or_default()
            .mutes
            .push(muted);
    }

    fn request_fullscreen(&self) {
        self.registry
            .lock()
            .outputs
            .entry(self.session)
            .or_default()
            .fullscreen += 1;
    }
}

/// Session context backed by `factory` with default settings
pub fn mock_context(
    factory: &Arc<MockFactory>,
) -> (SessionContext, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let factory: Arc<dyn TransportFactory> = factory.clone();
    let context = SessionContext::new(
        Arc::new(ServerConfig::default()),
        factory,
        tx,
        &SessionSettings::default(),
    );
    (context, rx)
}
