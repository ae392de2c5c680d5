//! Execution Core Binary
//!
//! Starts the risk-gated execution core with simulated venues and the
//! status API.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin execution-core
//! ```
//!
//! # Environment Variables
//!
//! - `EXECUTION_CONFIG`: Config file path (default: config.yaml; missing file uses defaults)
//! - `RUST_LOG`: Log filter (overrides `observability.logging.level`)
//! - Any `${VAR}` referenced from the config file

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use execution_core::config::{self, Config, DEFAULT_CONFIG_PATH};
use execution_core::context::TradingContext;
use execution_core::observability::init_metrics;
use execution_core::persistence::{SnapshotStore, StateSnapshot, run_snapshot_loop};
use execution_core::server;
use execution_core::telemetry::init_telemetry;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    let _telemetry = init_telemetry(&config.observability);

    tracing::info!(
        venues = config.engine.venues.len(),
        batch_size = config.engine.batch_size,
        workers = config.engine.initial_workers,
        "Starting execution core"
    );

    init_metrics(&config.observability.metrics).context("metrics exporter")?;

    let shutdown = CancellationToken::new();
    let ctx = TradingContext::from_config(config, shutdown.clone());

    let store = ctx
        .config()
        .persistence
        .enabled
        .then(|| SnapshotStore::new(&ctx.config().persistence.snapshot_path));
    if let Some(snapshot) = store.as_ref().and_then(SnapshotStore::load) {
        snapshot.apply(ctx.risk(), ctx.resilience());
    }

    let state = ctx.start_simulated().context("start engine")?;
    tracing::info!(state = %state, instance_id = %ctx.engine().instance_id(), "Engine started");

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    if let Some(store) = store.clone() {
        let persistence = &ctx.config().persistence;
        tasks.push(tokio::spawn(run_snapshot_loop(
            store,
            Arc::clone(ctx.risk()),
            Arc::clone(ctx.resilience()),
            Duration::from_secs(persistence.snapshot_interval_secs.max(1)),
            persistence.history_in_snapshot,
            shutdown.child_token(),
        )));
    }
    if ctx.config().server.enabled {
        tasks.push(start_http_server(&ctx, shutdown.child_token())?);
    }

    shutdown_signal().await;

    match ctx.shutdown().await {
        Ok(summary) => tracing::info!(
            clean = summary.clean,
            panicked = summary.panicked,
            timed_out = summary.timed_out,
            "Workers drained"
        ),
        Err(e) => tracing::error!(error = %e, "Engine shutdown failed"),
    }

    for task in tasks {
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
            tracing::warn!("Background task did not stop before timeout");
        }
    }

    if let Some(store) = store {
        let persistence = &ctx.config().persistence;
        let snapshot = StateSnapshot::capture(ctx.risk(), ctx.resilience(), persistence.history_in_snapshot);
        match store.save(&snapshot) {
            Ok(()) => tracing::info!(path = %store.path().display(), "Final state snapshot written"),
            Err(e) => tracing::error!(error = %e, "Final state snapshot failed"),
        }
    }

    tracing::info!("Execution core stopped");
    Ok(())
}

/// Load config from `EXECUTION_CONFIG`; a missing default file means defaults.
fn load_config() -> anyhow::Result<Config> {
    let explicit = std::env::var("EXECUTION_CONFIG").ok();
    let path = explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);

    if explicit.is_none() && !Path::new(path).exists() {
        eprintln!("No {DEFAULT_CONFIG_PATH} found, using defaults");
        return config::load_config_from_string("").context("default config");
    }
    config::load_config(Some(path)).with_context(|| format!("loading {path}"))
}

/// Start the status API on its own task.
fn start_http_server(
    ctx: &TradingContext,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let server_config = &ctx.config().server;
    let addr: SocketAddr = format!("{}:{}", server_config.bind_address, server_config.http_port)
        .parse()
        .with_context(|| format!("invalid bind address {}", server_config.bind_address))?;

    let ctx = ctx.clone();
    Ok(tokio::spawn(async move {
        if let Err(e) = server::serve(ctx, addr, shutdown).await {
            tracing::error!(error = %e, addr = %addr, "Status API failed");
        }
    }))
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; a process that cannot
/// observe termination signals should fail at startup.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
