//! Interaction sample (heatmap) entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

/// Heatmap interaction captured together with viewport and device context
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "interaction_samples")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Interaction kind reported by the client (click, scroll, ...)
    pub interaction_type: String,

    /// Sanitized interaction data
    pub payload: JsonValue,

    pub page_url: String,

    pub actor_ip: String,

    pub viewport_width: i32,

    pub viewport_height: i32,

    /// One of `mobile`, `tablet`, `desktop`
    pub device_type: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
