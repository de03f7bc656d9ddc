//! TideKV server entry point.
//!
//! Parses the command line, restores the last snapshot, starts the background
//! tasks, and serves clients until Ctrl+C. A final snapshot is written on the
//! way out.

use clap::Parser;
use std::sync::Arc;
use tidekv::commands::{CommandHandler, Session};
use tidekv::config::Config;
use tidekv::connection::{handle_connection, ConnectionStats};
use tidekv::pubsub::PubSub;
use tidekv::storage::{start_expiry_sweeper, SnapshotTask, StorageEngine};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &Config) {
    let persistence = match config.snapshot_path() {
        Some(path) => path.display().to_string(),
        None => "disabled".to_string(),
    };
    println!(
        r#"
  _   _     _      _
 | |_(_)__| |___ | |____ __
 |  _| / _` / -_)| / /\ V /
  \__|_\__,_\___||_\_\ \_/

TideKV v{} - in-memory key-value server
──────────────────────────────────────────
Listening on   {}
Max keys       {}
Snapshot       {}

Use Ctrl+C to shutdown gracefully.
"#,
        tidekv::VERSION,
        config.bind_address(),
        config.max_keys,
        persistence,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    print_banner(&config);

    let storage = Arc::new(StorageEngine::with_config(config.storage_config()));
    let restored = storage.load();
    info!(
        keys = restored,
        max_keys = storage.max_keys(),
        "Storage engine initialized"
    );

    let _sweeper = start_expiry_sweeper(Arc::clone(&storage));

    let snapshot_task = config
        .snapshot_interval()
        .map(|interval| SnapshotTask::start(Arc::clone(&storage), interval));

    let stats = Arc::new(ConnectionStats::new());
    let pubsub = Arc::new(PubSub::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&storage), pubsub, Arc::clone(&stats)) => {}
        _ = shutdown => {}
    }

    let counters = stats.counters();
    info!(
        connections = counters.accepted,
        commands = counters.commands,
        bytes_in = counters.bytes_in,
        bytes_out = counters.bytes_out,
        "Stopped accepting connections"
    );

    drop(snapshot_task);

    if storage.snapshot().is_some() {
        let engine = Arc::clone(&storage);
        if !tokio::task::spawn_blocking(move || engine.save()).await? {
            warn!("Final snapshot failed; keys written since the last save are lost");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    pubsub: Arc<PubSub>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(Arc::clone(&storage));
                let session = Session::new(handler, Arc::clone(&pubsub));
                let stats = Arc::clone(&stats);

                tokio::spawn(handle_connection(stream, addr, session, stats));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
