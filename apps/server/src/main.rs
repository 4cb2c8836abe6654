//! ICY Relay Server - headless ICY metadata relay daemon.
//!
//! Loads a source catalog from YAML, subscribes to the configured sources and
//! logs every decoded metadata block until Ctrl+C or SIGTERM. Each source is
//! decoded by one shared session no matter how many watchers it has.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use icy_relay_core::{
    BroadcastSink, CancellationToken, LoggingSink, Relay, RelayError, RequestQueue,
};
use tokio::signal;
use tokio::task::JoinSet;

use crate::config::{parse_source_arg, ServerConfig};

/// ICY Relay Server - shared ICY/SHOUTcast metadata decoding.
#[derive(Parser, Debug)]
#[command(name = "icy-relay-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE", env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "RELAY_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Extra catalog entry as ID=URL (repeatable, overrides the config file).
    #[arg(short, long = "source", value_name = "ID=URL", value_parser = parse_source_arg)]
    sources: Vec<(String, String)>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("ICY Relay Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    config.add_sources(args.sources);

    let watched = config.watched_sources()?;
    log::info!(
        "Configuration: {} source(s) in catalog, watching {:?}, queue_capacity={}",
        config.sources.len(),
        watched,
        config.relay.queue_capacity
    );

    // Every block goes to its broadcast group and to the debug log
    let sink = BroadcastSink::new(config.relay.group_channel_capacity);
    sink.set_external_sink(Arc::new(LoggingSink));

    let relay = Relay::builder()
        .config(config.relay.clone())
        .catalog(Arc::new(config.catalog()))
        .sink(Arc::new(sink.clone()))
        .start()
        .context("Failed to start relay")?;

    let stop = CancellationToken::new();
    let mut watchers = JoinSet::new();
    for source_id in watched {
        watchers.spawn(watch_source(relay.queue(), source_id, stop.clone()));
    }

    log::info!("Relay started");

    // Wait for shutdown signal or for every watcher to finish on its own
    tokio::select! {
        _ = shutdown_signal() => log::info!("Shutdown signal received, cleaning up..."),
        _ = wait_all(&mut watchers) => log::info!("All sources ended"),
    }

    // Graceful shutdown: stop accepting requests, then release every subscription
    relay.shutdown();
    stop.cancel();
    wait_all(&mut watchers).await;

    log::info!(
        "Shutdown complete ({} broadcast group(s) served)",
        sink.groups().len()
    );
    Ok(())
}

/// Subscribes to one source and logs its metadata until it ends or `stop` fires.
///
/// Failed or ended sources are not retried.
async fn watch_source(queue: RequestQueue, source_id: String, stop: CancellationToken) {
    let mut subscription = match queue.subscribe_with_cancel(&source_id, &stop).await {
        Ok(subscription) => subscription,
        Err(RelayError::Cancelled) => return,
        Err(e) => {
            log::error!("[Watch] Could not subscribe to {}: {}", source_id, e);
            return;
        }
    };

    let info = subscription.info();
    log::info!(
        "[Watch] {} live (station {:?}, interval {})",
        source_id,
        info.headers.name.as_deref().unwrap_or("unknown"),
        info.interval
    );

    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => break,
            next = subscription.recv() => next,
        };

        match next {
            Ok(Some(metadata)) => match metadata.get("StreamTitle") {
                Some(title) => log::info!("[Watch] {}: {}", source_id, title),
                None => log::info!("[Watch] {}: {} field(s)", source_id, metadata.len()),
            },
            Ok(None) => {
                log::info!("[Watch] {} ended", source_id);
                break;
            }
            Err(e) => {
                log::warn!("[Watch] {} failed: {}", source_id, e);
                break;
            }
        }
    }

    subscription.dispose();
}

async fn wait_all(watchers: &mut JoinSet<()>) {
    while let Some(result) = watchers.join_next().await {
        if let Err(e) = result {
            log::error!("Watcher task failed: {}", e);
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
