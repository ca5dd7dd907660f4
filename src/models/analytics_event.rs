//! Analytics event entity model
//!
//! SeaORM entity for the append-only `analytics_events` table.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

/// A single tracked occurrence as persisted by the store
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "analytics_events")]
pub struct Model {
    /// Auto-assigned row identifier
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Producer-defined event identifier (e.g. page_load, quick_buy_success)
    pub event_type: String,

    /// Sanitized structured payload
    pub payload: JsonValue,

    /// Best-effort client address
    pub actor_ip: String,

    pub user_agent: String,

    /// Opaque client session correlation id
    pub session_id: String,

    pub page_url: String,

    pub referrer: String,

    /// Server timestamp assigned at insertion
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
