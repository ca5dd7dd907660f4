//! Chat interaction entity model
//!
//! One row per chatbot exchange in the `chat_interactions` table.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "chat_interactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Visitor message after text sanitization
    #[sea_orm(column_type = "Text")]
    pub user_message: String,

    /// Canned response returned to the visitor
    #[sea_orm(column_type = "Text")]
    pub bot_response: String,

    pub actor_ip: String,

    #[sea_orm(column_type = "Text")]
    pub user_agent: String,

    pub session_id: String,

    /// Time spent selecting the response, in milliseconds
    pub response_time_ms: i32,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
