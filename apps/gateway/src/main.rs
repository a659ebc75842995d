//! # blegate: BLE Telemetry Gateway
//!
//! Host binary. Scans for whitelisted BLE peripherals, collects their
//! characteristics and relays the resulting transactions to the backend.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Gateway Startup                                   │
//! │                                                                         │
//! │  1. Load config ──────── --config <path> | platform dir | env overrides │
//! │  2. Init logging ─────── pretty or JSON, RUST_LOG overrides level       │
//! │  3. Open database ────── SQLite + migrations            (fatal)         │
//! │  4. Cloud client ─────── reqwest with gateway credential                │
//! │  5. Open radio ───────── btleplug adapter               (fatal)         │
//! │  6. Agent start ──────── authenticate, then spawn tasks (fatal)         │
//! │  7. Log events ───────── every reported failure at ERROR                │
//! │  8. Ctrl-C / SIGTERM ─── cancel + join all tasks                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed startup exits with 78 for configuration errors, 69 for other
//! fatal errors and 75 when a retry may succeed (backend unreachable).

#[cfg(feature = "btleplug")]
mod btle;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use blegate_db::{Database, DbConfig};
use blegate_sync::{
    EventStream, GatewayAgent, GatewayConfig, GatewayError, HttpCloudClient, LogFormat, Radio,
    RadioEvent,
};

/// Capacity of the radio → orchestrator event queue.
const RADIO_EVENT_QUEUE: usize = 64;

/// Exit status for a startup error that retrying cannot fix (sysexits
/// EX_UNAVAILABLE / EX_CONFIG), or that a supervisor may retry (EX_TEMPFAIL).
const EXIT_UNAVAILABLE: u8 = 69;
const EXIT_TEMPFAIL: u8 = 75;
const EXIT_CONFIG: u8 = 78;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be up yet when configuration fails.
            eprintln!("blegate: {:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

async fn run() -> Result<()> {
    let config = GatewayConfig::load(config_path_from_args()?)
        .context("Failed to load gateway configuration")?;

    init_tracing(config.logging.format);
    info!(
        gateway = %config.gateway.hash,
        backend = %config.cloud.base_url,
        "Starting blegate"
    );

    let db_config = DbConfig::new(config.database_path())
        .max_connections(config.database.max_connections);
    let db = Database::new(db_config)
        .await
        .map_err(|e| startup_failed("database", e.into()))
        .context("Failed to open the local store")?;
    let db = Arc::new(db);
    info!("Database connected and migrations applied");

    let cloud = HttpCloudClient::new(&config)
        .map_err(|e| startup_failed("cloud", e.into()))
        .context("Failed to build backend client")?;
    let cloud = Arc::new(cloud);

    let (radio_tx, radio_rx) = mpsc::channel(RADIO_EVENT_QUEUE);
    let radio = open_radio(radio_tx)
        .await
        .map_err(|e| startup_failed("radio", e))
        .context("Failed to open the radio backend")?;

    let (handle, events) = GatewayAgent::start(&config, db.clone(), cloud, radio, radio_rx)
        .await
        .map_err(|e| startup_failed("agent", e))
        .context("Failed to start the gateway")?;

    if let Some(gate) = handle.gate() {
        info!(gate = ?gate, "Authenticated with backend");
    }

    let log_task = tokio::spawn(log_events(events));

    shutdown_signal().await;

    handle.shutdown().await;
    if let Err(e) = log_task.await {
        warn!(error = %e, "Event logger ended abnormally");
    }
    db.close().await;

    info!("blegate stopped");
    Ok(())
}

/// Logs a failed startup step and hands the error back.
fn startup_failed(step: &'static str, e: GatewayError) -> GatewayError {
    error!(
        step,
        fatal = e.is_fatal_at_startup(),
        error = %e,
        "Startup step failed"
    );
    e
}

/// Maps a startup failure onto a process exit status.
fn exit_status(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<GatewayError>() {
        Some(e) if e.is_config_error() => EXIT_CONFIG,
        Some(e) if e.is_fatal_at_startup() => EXIT_UNAVAILABLE,
        Some(_) => EXIT_TEMPFAIL,
        None => 1,
    }
}

/// Reads `--config <path>` (or `--config=<path>`) from the command line.
fn config_path_from_args() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().context("--config requires a path")?;
            return Ok(Some(PathBuf::from(path)));
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Ok(Some(PathBuf::from(path)));
        }
        anyhow::bail!("Unknown argument: {}", arg);
    }

    Ok(None)
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=blegate_sync=trace` - Trace the runtime only
/// - Default: INFO, DEBUG for the gateway crates
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,blegate_sync=debug,blegate_db=debug,sqlx=warn")
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Consumes the event stream until every sink is gone.
async fn log_events(mut events: EventStream) {
    while let Some(event) = events.recv().await {
        error!(
            source = %event.source,
            at = %event.at,
            error = %event.error,
            "Gateway error"
        );
    }

    let dropped = events.dropped();
    if dropped > 0 {
        warn!(dropped, "Events dropped while the sink was full");
    }
}

#[cfg(feature = "btleplug")]
async fn open_radio(events: mpsc::Sender<RadioEvent>) -> Result<Arc<dyn Radio>, GatewayError> {
    let radio = btle::BtleRadio::open(events).await?;
    Ok(radio)
}

#[cfg(not(feature = "btleplug"))]
async fn open_radio(_events: mpsc::Sender<RadioEvent>) -> Result<Arc<dyn Radio>, GatewayError> {
    Err(GatewayError::NoRadioBackend)
}

/// Waits for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, stopping gateway");
}
