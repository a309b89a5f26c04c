//! HTTP manifest poller implementing the transport capability
//!
//! Fetches the manifest (following a master playlist to its first variant),
//! reports it ready, then re-polls the media playlist once per target
//! duration. New segments are handed to the output and reported as appended
//! data. A playlist that stops advancing is reported as a stall. Nothing is
//! decoded here, so media errors never originate from this transport.

use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::transport::{
    ErrorCategory, EventSink, NetworkFailure, OutputSink, Transport, TransportEvent,
    TransportFactory,
};
use crate::config::HlsSettings;
use crate::error::Result;

/// Shortest interval between two polls of a live playlist
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Builds [`HlsTransport`]s sharing one HTTP client
pub struct HlsTransportFactory {
    client: reqwest::Client,
    settings: HlsSettings,
}

impl HlsTransportFactory {
    pub fn new(settings: &HlsSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }
}

impl TransportFactory for HlsTransportFactory {
    fn create(&self, events: EventSink) -> Box<dyn Transport> {
        Box::new(HlsTransport::new(
            self.client.clone(),
            self.settings.stall_after,
            events,
        ))
    }
}

/// One polling attempt against one manifest URL
pub struct HlsTransport {
    client: reqwest::Client,
    stall_after: u32,
    events: EventSink,
    output: Option<Arc<dyn OutputSink>>,
    url: Option<String>,
    playing: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl HlsTransport {
    pub fn new(client: reqwest::Client, stall_after: u32, events: EventSink) -> Self {
        Self {
            client,
            stall_after: stall_after.max(1),
            events,
            output: None,
            url: None,
            playing: Arc::new(AtomicBool::new(false)),
            worker: None,
            destroyed: false,
        }
    }

    fn spawn_worker(&mut self) {
        self.stop_worker();
        if self.destroyed {
            return;
        }
        let Some(url) = self.url.clone() else {
            debug!(session = %self.events.session(), "No manifest URL to load");
            return;
        };

        let poller = Poller {
            client: self.client.clone(),
            events: self.events.clone(),
            output: self.output.clone(),
            playing: self.playing.clone(),
            stall_after: self.stall_after,
        };
        self.worker = Some(tokio::spawn(poller.run(url)));
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl Transport for HlsTransport {
    fn load(&mut self, url: &str) {
        self.url = Some(url.to_string());
        self.playing.store(false, Ordering::SeqCst);
        self.spawn_worker();
    }

    fn attach_output(&mut self, sink: Arc<dyn OutputSink>) {
        self.output = Some(sink);
    }

    fn play(&mut self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    fn start_load(&mut self) {
        self.spawn_worker();
    }

    fn recover_media_error(&mut self) {
        debug!(
            session = %self.events.session(),
            "Media recovery requested, nothing is decoded by the HLS poller"
        );
    }

    fn destroy(&mut self) {
        self.destroyed = true;
        self.stop_worker();
        self.output = None;
    }
}

impl Drop for HlsTransport {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

struct Poller {
    client: reqwest::Client,
    events: EventSink,
    output: Option<Arc<dyn OutputSink>>,
    playing: Arc<AtomicBool>,
    stall_after: u32,
}

impl Poller {
    async fn run(self, url: String) {
        let (mut playlist, media_url) = match fetch_media_playlist(&self.client, &url).await {
            Ok(found) => found,
            Err(category) => {
                self.events.emit(TransportEvent::Fatal(category));
                return;
            }
        };

        let mut cursor = SegmentCursor::default();
        cursor.advance(&playlist);
        self.events.emit(TransportEvent::ManifestReady);

        let mut idle_polls = 0u32;
        let mut stalled = false;

        while !playlist.end_list {
            tokio::time::sleep(poll_interval(&playlist)).await;

            playlist = match fetch_playlist(&self.client, &media_url).await {
                Ok(Playlist::MediaPlaylist(next)) => next,
                Ok(Playlist::MasterPlaylist(_)) => {
                    let category = ErrorCategory::Other("unexpected master playlist".into());
                    self.events.emit(TransportEvent::Fatal(category));
                    return;
                }
                Err(category) => {
                    self.events.emit(TransportEvent::Fatal(category));
                    return;
                }
            };

            let fresh = cursor.advance(&playlist);
            if fresh.is_empty() {
                idle_polls += 1;
                if idle_polls >= self.stall_after && !stalled {
                    stalled = true;
                    self.events.emit(TransportEvent::Stall);
                }
                continue;
            }

            idle_polls = 0;
            stalled = false;
            trace!(session = %self.events.session(), count = fresh.len(), "New segments");
            if self.playing.load(Ordering::SeqCst) {
                if let Some(output) = &self.output {
                    for uri in &fresh {
                        let resolved = resolve(&media_url, uri).unwrap_or_else(|_| uri.clone());
                        output.segment_ready(&resolved);
                    }
                }
            }
            self.events.emit(TransportEvent::DataAppended);
        }

        debug!(session = %self.events.session(), "Playlist ended");
    }
}

/// Tracks which media sequence numbers have already been seen
#[derive(Debug, Default)]
struct SegmentCursor {
    next_sequence: Option<u64>,
}

impl SegmentCursor {
    /// URIs of segments not seen before
    fn advance(&mut self, playlist: &MediaPlaylist) -> Vec<String> {
        let first = playlist.media_sequence;
        let next = self.next_sequence.unwrap_or(first);

        let fresh = playlist
            .segments
            .iter()
            .enumerate()
            .filter(|(offset, _)| first + *offset as u64 >= next)
            .map(|(_, segment)| segment.uri.clone())
            .collect();

        let end = first + playlist.segments.len() as u64;
        self.next_sequence = Some(end.max(next));
        fresh
    }
}

fn poll_interval(playlist: &MediaPlaylist) -> Duration {
    Duration::from_secs_f64(playlist.target_duration as f64).max(MIN_POLL_INTERVAL)
}

async fn fetch_playlist(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<Playlist, ErrorCategory> {
    let response = client.get(url).send().await.map_err(|e| {
        debug!(url, error = %e, "Manifest request failed");
        ErrorCategory::Network(NetworkFailure::NoResponse)
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ErrorCategory::Network(NetworkFailure::HttpStatus(
            status.as_u16(),
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|_| ErrorCategory::Network(NetworkFailure::NoResponse))?;
    parse_playlist(&body)
}

async fn fetch_media_playlist(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<(MediaPlaylist, String), ErrorCategory> {
    match fetch_playlist(client, url).await? {
        Playlist::MediaPlaylist(playlist) => Ok((playlist, url.to_string())),
        Playlist::MasterPlaylist(master) => {
            let variant_url = first_variant_url(&master, url)?;
            match fetch_playlist(client, &variant_url).await? {
                Playlist::MediaPlaylist(playlist) => Ok((playlist, variant_url)),
                Playlist::MasterPlaylist(_) => {
                    Err(ErrorCategory::Other("nested master playlist".into()))
                }
            }
        }
    }
}

fn parse_playlist(body: &[u8]) -> std::result::Result<Playlist, ErrorCategory> {
    m3u8_rs::parse_playlist_res(body).map_err(|_| ErrorCategory::Other("manifest parse".into()))
}

fn first_variant_url(
    master: &MasterPlaylist,
    base: &str,
) -> std::result::Result<String, ErrorCategory> {
    let variant = master
        .variants
        .first()
        .ok_or_else(|| ErrorCategory::Other("master playlist has no variants".into()))?;
    resolve(base, &variant.uri)
}

fn resolve(base: &str, uri: &str) -> std::result::Result<String, ErrorCategory> {
    let base =
        reqwest::Url::parse(base).map_err(|_| ErrorCategory::Other("invalid manifest url".into()))?;
    base.join(uri)
        .map(|url| url.to_string())
        .map_err(|_| ErrorCategory::Other("invalid playlist uri".into()))
}
