//! Crashpoint server binary.
//!
//! Boots the round engine, recovers recent crash history and operator
//! override state from storage, and serves the WebSocket/HTTP surface.

use clap::Parser;
use crashpoint::api::{ApiServer, AppState};
use crashpoint::broadcast::Publisher;
use crashpoint::config::CrashpointConfig;
use crashpoint::engine::{CrashPointSelector, RoundEngine, WagerLedger};
use crashpoint::storage::{PersistenceGateway, PersistenceHandle, RocksStorage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "crashpoint")]
#[command(about = "Crash wagering round engine", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// API server host override
    #[arg(long)]
    host: Option<String>,

    /// API server port override
    #[arg(long)]
    port: Option<u16>,

    /// Database directory override
    #[arg(long)]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crashpoint=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => CrashpointConfig::load(path)?,
        None => CrashpointConfig::default(),
    };
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.storage.data_directory = db_path;
    }
    config.validate()?;

    info!("opening database at {}", config.storage.data_directory);
    let storage = Arc::new(RocksStorage::new(&config.storage.data_directory)?);

    // Startup recovery: only recent crash history and the operator
    // override state come back; wager ledgers are not replayed.
    let history = storage
        .load_recent_crashes(config.round.history_limit)
        .await?;
    let override_state = storage.load_override().await?;
    info!(
        recovered_entries = history.len(),
        "recovered crash history"
    );

    let publisher = Publisher::new();
    let persistence = PersistenceHandle::spawn(storage);

    let mut selector = CrashPointSelector::new(config.selector.clone());
    selector.restore_override(override_state);
    let ledger = WagerLedger::new(config.ledger.clone());

    let engine = RoundEngine::new(
        &config,
        selector,
        ledger,
        publisher.clone(),
        persistence,
        history,
    );
    let handle = crashpoint::engine::spawn(engine, config.round.clone());

    let state = Arc::new(AppState {
        engine: handle,
        publisher,
        version: env!("CARGO_PKG_VERSION").to_string(),
    });
    ApiServer::new(config.api.clone(), state).run().await
}
