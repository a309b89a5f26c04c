//! Feed Monitor console
//!
//! Runs the session monitor against the HLS poller. Every line read from
//! stdin is submitted as comma-separated stream keys; the ordered session
//! view is logged periodically.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feed_monitor::{
    config::AppConfig,
    playback::HlsTransportFactory,
    protocol::SessionStatus,
    sessions::{Monitor, MonitorHandle},
};

/// Interval between status reports
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Feed Monitor");

    let config = match std::env::var_os("FEED_MONITOR_CONFIG") {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default()?,
    };

    tracing::info!(
        "Streaming server: {}://{}/{}",
        config.server.protocol,
        config.server.host,
        config.server.application_path
    );

    let factory = Arc::new(HlsTransportFactory::new(&config.hls)?);
    let (handle, monitor_task) = Monitor::spawn(&config, factory);

    tracing::info!("Enter stream keys (comma separated), Ctrl+C to stop");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status_timer = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => submit(&handle, &line).await?,
                None => break,
            },
            _ = status_timer.tick() => report(&handle),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await?;
    monitor_task.await?;
    Ok(())
}

async fn submit(handle: &MonitorHandle, line: &str) -> Result<()> {
    if line.trim().is_empty() {
        return Ok(());
    }

    let outcome = handle.add_keys(line).await?;
    for key in &outcome.added {
        tracing::info!("Added {}", key);
    }
    for key in &outcome.rejected_duplicates {
        tracing::warn!("Already monitoring {}", key);
    }
    for key in &outcome.dropped_over_capacity {
        tracing::warn!("No free slot for {}", key);
    }
    Ok(())
}

fn report(handle: &MonitorHandle) {
    let sessions = handle.sessions();
    if sessions.is_empty() {
        return;
    }

    if let Ok(json) = serde_json::to_string(&sessions) {
        tracing::debug!(view = %json, "Session view");
    }

    for session in &sessions {
        let pin = if session.is_pinned { " [PINNED]" } else { "" };
        match (session.status, &session.error_message) {
            (SessionStatus::Error, Some(message)) => {
                tracing::info!("{}{}: error ({})", session.stream_key, pin, message)
            }
            (status, _) => tracing::info!(
                "{}{}: {} {}s",
                session.stream_key,
                pin,
                status,
                session.elapsed_seconds
            ),
        }
    }
}
