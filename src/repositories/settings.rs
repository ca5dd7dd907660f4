//! # Settings Repository
//!
//! Key/value persistence for site-level JSON blobs such as the feature flags.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{DatabaseConnection, EntityTrait, Set, sea_query::OnConflict};
use serde_json::Value as JsonValue;

use crate::error::PipelineError;
use crate::models::site_setting::{self, Entity as SiteSetting};

#[derive(Debug, Clone)]
pub struct SettingsRepository {
    db: Arc<DatabaseConnection>,
}

impl SettingsRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Stored value for `key`, if any.
    pub async fn get(&self, key: &str) -> Result<Option<JsonValue>, PipelineError> {
        let row = SiteSetting::find_by_id(key.to_string())
            .one(&*self.db)
            .await?;
        Ok(row.map(|setting| setting.value))
    }

    /// Insert or replace the value stored under `key`.
    pub async fn save(&self, key: &str, value: JsonValue) -> Result<(), PipelineError> {
        let row = site_setting::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value),
            updated_at: Set(Utc::now().fixed_offset()),
        };

        SiteSetting::insert(row)
            .on_conflict(
                OnConflict::column(site_setting::Column::Key)
                    .update_columns([site_setting::Column::Value, site_setting::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }
}
