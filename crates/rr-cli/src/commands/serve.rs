//! Serve command - runs the ingestion gateway and the workflow engine.

use anyhow::{Context, Result};
use colored::Colorize;
use rr_api::{shutdown_signal, ApiServer, ApiServerConfig, AppState};
use rr_core::{create_pool, run_migrations, SharedStateStore, SqliteStateStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use super::build_engine;
use crate::config::AppConfig;

/// Runs the API server until Ctrl+C or SIGTERM.
pub async fn run_server(config: AppConfig) -> Result<()> {
    config.validate()?;

    let prometheus = match rr_observability::install_prometheus_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
            None
        }
    };

    println!("  {} Database: {}", "→".green(), config.database.url);
    let pool = create_pool(&config.database.url)
        .await
        .context("Failed to create database connection pool")?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    let store: SharedStateStore = Arc::new(SqliteStateStore::new(pool));

    let engine = build_engine(&config, store, config.engine_config())?;

    let report = engine
        .recover()
        .await
        .context("Failed to recover open incidents")?;
    info!(
        resumed = report.resumed,
        approvals_restored = report.approvals_restored,
        interrupted = report.interrupted,
        corrupt = report.corrupt,
        "Recovery complete"
    );
    if report.corrupt > 0 {
        println!(
            "  {} {} incident(s) could not be replayed, see logs",
            "!".yellow(),
            report.corrupt
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = engine.spawn_sweeper(shutdown_rx);

    let bind_address: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid bind address")?;
    let server_config = ApiServerConfig {
        bind_address,
        request_timeout: Duration::from_secs(config.server.request_timeout_secs),
        enable_swagger: config.server.enable_swagger,
    };

    let mut state = AppState::new(engine);
    if let Some(handle) = prometheus {
        state = state.with_prometheus_handle(handle);
    }

    println!();
    println!("{}", "Runbook Responder".bold());
    println!("{}", "═".repeat(40));
    println!("  {} http://{}", "Address:".cyan(), bind_address);
    if config.server.enable_swagger {
        println!("  {} http://{}/swagger-ui", "Swagger UI:".cyan(), bind_address);
    }
    println!();
    println!("Press {} to stop", "Ctrl+C".yellow());
    println!();

    let served = ApiServer::new(state, server_config)
        .run_until(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Approval sweep task ended abnormally");
    }

    served.context("Server error")?;
    println!("{} Server stopped", "[server]".cyan());
    Ok(())
}
