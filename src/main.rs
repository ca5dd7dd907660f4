//! # site-pulse Main Entry Point
//!
//! Loads configuration, prepares the database and runs the HTTP server
//! alongside the retention loop until Ctrl+C.

use std::sync::Arc;

use anyhow::Context;
use migration::{Migrator, MigratorTrait};
use site_pulse::{
    config::ConfigLoader, db, retention::RetentionService, server::run_server, telemetry,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        info!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    Migrator::up(&db, None).await.context("applying migrations")?;

    let config = Arc::new(config);
    let db = Arc::new(db);
    let shutdown = CancellationToken::new();

    let retention = RetentionService::new(config.retention.clone(), db.clone());
    let retention_shutdown = shutdown.clone();
    let retention_task = tokio::spawn(async move {
        if let Err(err) = retention.run(retention_shutdown).await {
            error!(error = %err, "Retention service exited with error");
        }
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal_shutdown.cancel();
            }
            Err(err) => error!(error = %err, "Failed to listen for shutdown signal"),
        }
    });

    let served = run_server(config, db, shutdown.clone()).await;
    shutdown.cancel();
    let _ = retention_task.await;
    served
}
