//! # Chat Log Repository

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use super::RowId;
use crate::error::PipelineError;
use crate::events::NewChatInteraction;
use crate::models::chat_interaction::{self, Entity as ChatInteraction};

/// Repository for chatbot exchanges
#[derive(Debug, Clone)]
pub struct ChatLogRepository {
    db: Arc<DatabaseConnection>,
}

impl ChatLogRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, interaction: NewChatInteraction) -> Result<RowId, PipelineError> {
        self.insert_at(interaction, Utc::now()).await
    }

    pub async fn insert_at(
        &self,
        interaction: NewChatInteraction,
        created_at: DateTime<Utc>,
    ) -> Result<RowId, PipelineError> {
        if interaction.user_message.is_empty() {
            return Err(PipelineError::validation("user_message must not be empty"));
        }

        let row = chat_interaction::ActiveModel {
            user_message: Set(interaction.user_message),
            bot_response: Set(interaction.bot_response),
            actor_ip: Set(interaction.meta.actor_ip),
            user_agent: Set(interaction.meta.user_agent),
            session_id: Set(interaction.meta.session_id),
            response_time_ms: Set(interaction.response_time_ms.max(0)),
            created_at: Set(created_at.fixed_offset()),
            ..Default::default()
        };

        let result = ChatInteraction::insert(row).exec(&*self.db).await?;
        Ok(result.last_insert_id)
    }

    pub async fn find_by_id(
        &self,
        id: RowId,
    ) -> Result<Option<chat_interaction::Model>, PipelineError> {
        Ok(ChatInteraction::find_by_id(id).one(&*self.db).await?)
    }

    /// Delete every exchange created before `cutoff`.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, PipelineError> {
        let result = ChatInteraction::delete_many()
            .filter(chat_interaction::Column::CreatedAt.lt(cutoff.fixed_offset()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
