//! Migration to create the chat_interactions table.
//!
//! Stores one row per chatbot exchange (visitor message plus canned reply).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChatInteractions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChatInteractions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ChatInteractions::UserMessage).text().not_null())
                    .col(ColumnDef::new(ChatInteractions::BotResponse).text().not_null())
                    .col(ColumnDef::new(ChatInteractions::ActorIp).string_len(45).not_null())
                    .col(ColumnDef::new(ChatInteractions::UserAgent).text().not_null())
                    .col(
                        ColumnDef::new(ChatInteractions::SessionId)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChatInteractions::ResponseTimeMs)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ChatInteractions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        for (name, column) in [
            ("idx_chat_interactions_created_at", ChatInteractions::CreatedAt),
            ("idx_chat_interactions_actor_ip", ChatInteractions::ActorIp),
            ("idx_chat_interactions_session_id", ChatInteractions::SessionId),
        ] {
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name(name)
                        .table(ChatInteractions::Table)
                        .col(column)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChatInteractions::Table).if_exists().to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ChatInteractions {
    Table,
    Id,
    UserMessage,
    BotResponse,
    ActorIp,
    UserAgent,
    SessionId,
    ResponseTimeMs,
    CreatedAt,
}
