//! Test utilities for database testing.
//!
//! This module provides utilities for setting up in-memory SQLite databases
//! with migrations for testing purposes.

use std::sync::Arc;

use anyhow::Result;
use axum::http::HeaderMap;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use site_pulse::events::RequestMetadata;

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// The pool is capped at one connection; every SQLite memory connection
/// would otherwise see its own empty database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Sets up an in-memory SQLite database with all migrations applied and returns an Arc.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    let db = setup_test_db().await?;
    Ok(Arc::new(db))
}

/// Request metadata for a visitor at `ip`.
pub fn visitor(ip: &str) -> RequestMetadata {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", ip.parse().expect("valid header value"));
    headers.insert("x-session-id", format!("sess-{ip}").parse().expect("valid header value"));
    RequestMetadata::from_request(&headers, "/", None)
}
