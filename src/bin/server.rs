//! folio-sync server - headless market-data sync and valuation engine
//!
//! Keeps current prices, price history, market dominance and portfolio
//! valuations up to date for every held asset. Metrics are pushed via
//! structured JSON logs to stdout.
//!
//! # Usage
//! ```sh
//! MODE=mock cargo run --bin server
//! cargo run --bin server -- --once --database-url sqlite://data/tracker.db
//! ```
//!
//! # Environment Variables
//! - `MODE` - `live` or `mock` (default: live)
//! - `DATABASE_URL` - SQLite store (default: sqlite://tracker.db)
//! - `API_KEY_CRYPTOCOMPARE` - market-data API key
//! - `OBSERVABILITY_ENABLED` - Enable metrics reporting (default: true)
//! - `OBSERVABILITY_INTERVAL` - Interval in seconds between metric outputs (default: 60)

use anyhow::Result;
use clap::Parser;
use folio_sync::application::system::Application;
use folio_sync::config::Config;
use folio_sync::domain::events::EngineEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run one refresh cycle and one valuation pass, then exit
    #[arg(long)]
    once: bool,

    /// Overrides DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Setup logging (stdout only)
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("folio-sync server {} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env()?;
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    info!(
        "Configuration loaded: Mode={:?}, Database={}, Sync every {}s, Valuation every {}s",
        config.mode,
        config.database_url,
        config.sync.sync_interval_secs,
        config.sync.valuation_interval_secs
    );

    let app = Application::build(config).await?;

    if args.once {
        let (cycle, valuation) = app.run_once().await?;
        info!(
            "Single run finished: cycle {:?} ({} symbol(s) saved), {} valuation snapshot(s)",
            cycle.outcome, cycle.symbols_persisted, valuation.snapshots
        );
        app.scheduler.stop();
        return Ok(());
    }

    let handle = app.start().await?;

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::DataUpdated { at, symbols }) => {
                    info!("Event dataUpdated: {} symbol(s) at {}", symbols, at);
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Event listener lagged, {} event(s) missed", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!("Server running. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    handle.shutdown().await;

    Ok(())
}
