//! # Interaction Sample Repository
//!
//! Heatmap-style samples (clicks, scrolls, viewport) in `interaction_samples`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use super::RowId;
use crate::error::PipelineError;
use crate::events::{MAX_EVENT_TYPE_LEN, NewInteractionSample, clamp};
use crate::models::interaction_sample::{self, Entity as InteractionSample};
use crate::sanitize::to_json;

#[derive(Debug, Clone)]
pub struct InteractionRepository {
    db: Arc<DatabaseConnection>,
}

impl InteractionRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, sample: NewInteractionSample) -> Result<RowId, PipelineError> {
        self.insert_at(sample, Utc::now()).await
    }

    pub async fn insert_at(
        &self,
        sample: NewInteractionSample,
        created_at: DateTime<Utc>,
    ) -> Result<RowId, PipelineError> {
        let interaction_type = clamp(sample.interaction_type.trim(), MAX_EVENT_TYPE_LEN);
        if interaction_type.is_empty() {
            return Err(PipelineError::validation("interaction_type must not be empty"));
        }

        let row = interaction_sample::ActiveModel {
            interaction_type: Set(interaction_type),
            payload: Set(to_json(&sample.payload)),
            page_url: Set(sample.page_url),
            actor_ip: Set(sample.meta.actor_ip),
            viewport_width: Set(sample.viewport_width.max(0)),
            viewport_height: Set(sample.viewport_height.max(0)),
            device_type: Set(sample.device_type.as_str().to_string()),
            created_at: Set(created_at.fixed_offset()),
            ..Default::default()
        };

        let result = InteractionSample::insert(row).exec(&*self.db).await?;
        Ok(result.last_insert_id)
    }

    pub async fn find_by_id(
        &self,
        id: RowId,
    ) -> Result<Option<interaction_sample::Model>, PipelineError> {
        Ok(InteractionSample::find_by_id(id).one(&*self.db).await?)
    }

    /// Delete every sample created before `cutoff`.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, PipelineError> {
        let result = InteractionSample::delete_many()
            .filter(interaction_sample::Column::CreatedAt.lt(cutoff.fixed_offset()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
