//! # Retention Service
//!
//! Background task that periodically deletes log rows older than the
//! configured maximum age from the event, chat and interaction tables.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::RetentionConfig;
use crate::error::PipelineError;
use crate::repositories::{ChatLogRepository, EventRepository, InteractionRepository};

/// Rows removed by one prune pass, per table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub events: u64,
    pub chat_interactions: u64,
    pub interaction_samples: u64,
}

impl PruneReport {
    pub fn total(&self) -> u64 {
        self.events + self.chat_interactions + self.interaction_samples
    }
}

/// Periodic log trimmer
#[derive(Clone)]
pub struct RetentionService {
    config: RetentionConfig,
    events: EventRepository,
    chat_log: ChatLogRepository,
    interactions: InteractionRepository,
}

impl RetentionService {
    pub fn new(config: RetentionConfig, db: Arc<DatabaseConnection>) -> Self {
        Self {
            config,
            events: EventRepository::new(db.clone()),
            chat_log: ChatLogRepository::new(db.clone()),
            interactions: InteractionRepository::new(db),
        }
    }

    /// Run the prune loop until the provided shutdown token fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), PipelineError> {
        info!(
            tick_seconds = self.config.tick_seconds,
            max_age_days = self.config.max_age_days,
            "Starting retention service"
        );
        let tick_interval = TokioDuration::from_secs(self.config.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Retention service shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = std::time::Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Retention tick failed");
                    }
                    histogram!("retention_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Retention service stopped");
        Ok(())
    }

    /// One prune pass using the configured maximum age
    pub async fn tick(&self) -> Result<PruneReport, PipelineError> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.config.max_age_days));
        self.prune_before(cutoff).await
    }

    /// Delete rows from all three log tables created before `cutoff`
    #[instrument(skip(self))]
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<PruneReport, PipelineError> {
        let report = PruneReport {
            events: self.events.prune_older_than(cutoff).await?,
            chat_interactions: self.chat_log.prune_older_than(cutoff).await?,
            interaction_samples: self.interactions.prune_older_than(cutoff).await?,
        };

        counter!("retention_rows_pruned_total", "table" => "analytics_events")
            .increment(report.events);
        counter!("retention_rows_pruned_total", "table" => "chat_interactions")
            .increment(report.chat_interactions);
        counter!("retention_rows_pruned_total", "table" => "interaction_samples")
            .increment(report.interaction_samples);

        info!(
            %cutoff,
            events = report.events,
            chat_interactions = report.chat_interactions,
            interaction_samples = report.interaction_samples,
            "Pruned expired log rows"
        );
        Ok(report)
    }
}
