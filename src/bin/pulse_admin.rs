//! Operator CLI: one-off prune passes and schema management.

use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use site_pulse::{config::ConfigLoader, db, retention::RetentionService, telemetry};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pulse-admin")]
#[command(about = "Maintenance commands for the site-pulse event store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Delete event, chat and interaction rows older than the given age
    Prune {
        /// Maximum age in days (defaults to PULSE_RETENTION_MAX_AGE_DAYS)
        #[arg(long)]
        older_than_days: Option<u32>,
    },
    /// Apply pending migrations
    Migrate,
    /// Drop every pipeline table
    Reset {
        /// Confirm the irreversible drop
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command {
        Command::Prune { older_than_days } => {
            let days = older_than_days.unwrap_or(config.retention.max_age_days);
            if days == 0 {
                bail!("--older-than-days must be at least 1");
            }
            let service = RetentionService::new(config.retention.clone(), Arc::new(db));
            let cutoff = Utc::now() - Duration::days(i64::from(days));
            let report = service
                .prune_before(cutoff)
                .await
                .context("pruning expired rows")?;
            println!(
                "Pruned {} rows ({} events, {} chat interactions, {} interaction samples)",
                report.total(),
                report.events,
                report.chat_interactions,
                report.interaction_samples
            );
        }
        Command::Migrate => {
            Migrator::up(&db, None).await.context("applying migrations")?;
            println!("Migrations applied");
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("refusing to drop pipeline tables without --yes");
            }
            Migrator::down(&db, None).await.context("reverting migrations")?;
            println!("Pipeline tables dropped");
        }
    }

    Ok(())
}
