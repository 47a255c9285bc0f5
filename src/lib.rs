//! VantageWatch -- multi-vantage-point network monitoring with online
//! baseline anomaly detection.
//!
//! Checks are issued through a distributed probing service (check-host.net),
//! every vantage point's answer is normalised into a row, and each row's
//! latency and loss feed a per-stream running baseline that classifies the
//! fresh sample before absorbing it.

pub mod api;
pub mod check;
pub mod config;
pub mod detect;
pub mod monitor;
pub mod probes;
pub mod storage;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::check::Checker;
use crate::config::Config;
use crate::detect::baseline::BaselineStore;
use crate::monitor::{AlertSink, LedgerSink, LogSink, MultiSink};
use crate::probes::checkhost::CheckHostClient;

/// Build a checker wired to the configured probing service and `store`.
pub fn build_checker(config: &Config, store: BaselineStore) -> Result<Checker> {
    let client = CheckHostClient::new(
        &config.probing.base_url,
        Duration::from_secs(config.probing.request_timeout_secs),
    )
    .context("failed to build probing service client")?;

    Ok(Checker::new(
        Arc::new(client),
        config.poller(),
        store,
        config.probing.max_nodes,
    ))
}

/// Start the daemon: API server plus the periodic monitor, until ctrl-c.
pub async fn serve(config: Config) -> Result<()> {
    // 1. Storage
    let db_path = &config.storage.db_path;
    tracing::info!(db_path = %db_path.display(), "Initializing database");
    let pool = storage::open_pool(db_path)?;

    // 2. Checker and baselines
    let store = BaselineStore::open(&config.storage.baseline_path, config.detection);
    let checker = build_checker(&config, store)?;

    // 3. Monitor (background task)
    let shutdown = CancellationToken::new();
    let sinks: Vec<Arc<dyn AlertSink>> = vec![
        Arc::new(LogSink),
        Arc::new(LedgerSink::new(pool.clone())),
    ];
    let sink = Arc::new(MultiSink(sinks));
    let monitor = tokio::spawn(monitor::run(
        checker.clone(),
        config.monitor.targets.clone(),
        Duration::from_secs(config.monitor.interval_secs.max(1)),
        sink,
        shutdown.clone(),
    ));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown requested");
        signal.cancel();
    });

    // 4. API server
    let addr: std::net::SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.api.bind))?;
    let app = api::router(api::state::AppState {
        checker: checker.clone(),
        pool,
    })
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http());

    tracing::info!(%addr, "VantageWatch listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await?;

    shutdown.cancel();
    monitor.await.context("monitor task failed")?;
    if let Err(e) = checker.store().persist() {
        tracing::error!("Failed to persist baselines on shutdown: {}", e);
    }
    Ok(())
}
