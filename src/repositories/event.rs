//! # Event Repository
//!
//! Append-only writes and retention deletes for `analytics_events`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use super::RowId;
use crate::error::PipelineError;
use crate::events::{MAX_EVENT_TYPE_LEN, NewEvent, clamp};
use crate::models::analytics_event::{self, Entity as AnalyticsEvent};
use crate::sanitize::to_json;

/// Repository for analytics event rows
#[derive(Debug, Clone)]
pub struct EventRepository {
    db: Arc<DatabaseConnection>,
}

impl EventRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Persist one event stamped with the current server time.
    pub async fn insert(&self, event: NewEvent) -> Result<RowId, PipelineError> {
        self.insert_at(event, Utc::now()).await
    }

    /// Persist one event with an explicit timestamp (imports, backfills).
    pub async fn insert_at(
        &self,
        event: NewEvent,
        created_at: DateTime<Utc>,
    ) -> Result<RowId, PipelineError> {
        let event_type = clamp(event.event_type.trim(), MAX_EVENT_TYPE_LEN);
        if event_type.is_empty() {
            return Err(PipelineError::validation("event_type must not be empty"));
        }

        let row = analytics_event::ActiveModel {
            event_type: Set(event_type),
            payload: Set(to_json(&event.payload)),
            actor_ip: Set(event.meta.actor_ip),
            user_agent: Set(event.meta.user_agent),
            session_id: Set(event.meta.session_id),
            page_url: Set(event.meta.page_url),
            referrer: Set(event.meta.referrer),
            created_at: Set(created_at.fixed_offset()),
            ..Default::default()
        };

        let result = AnalyticsEvent::insert(row).exec(&*self.db).await?;
        Ok(result.last_insert_id)
    }

    /// Fetch a stored event by id.
    pub async fn find_by_id(&self, id: RowId) -> Result<Option<analytics_event::Model>, PipelineError> {
        Ok(AnalyticsEvent::find_by_id(id).one(&*self.db).await?)
    }

    /// Delete every event created before `cutoff`, returning the number of rows removed.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, PipelineError> {
        let result = AnalyticsEvent::delete_many()
            .filter(analytics_event::Column::CreatedAt.lt(cutoff.fixed_offset()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
