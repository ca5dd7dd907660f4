//! Migration to create the analytics_events table.
//!
//! Append-only log of generic tracked events. Rows are only ever removed in
//! bulk by the retention cycle.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AnalyticsEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AnalyticsEvents::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AnalyticsEvents::EventType)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(ColumnDef::new(AnalyticsEvents::Payload).json().not_null())
                    .col(ColumnDef::new(AnalyticsEvents::ActorIp).string_len(45).not_null())
                    .col(ColumnDef::new(AnalyticsEvents::UserAgent).text().not_null())
                    .col(
                        ColumnDef::new(AnalyticsEvents::SessionId)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(ColumnDef::new(AnalyticsEvents::PageUrl).string_len(500).not_null())
                    .col(ColumnDef::new(AnalyticsEvents::Referrer).string_len(500).not_null())
                    .col(
                        ColumnDef::new(AnalyticsEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        for (name, column) in [
            ("idx_analytics_events_event_type", AnalyticsEvents::EventType),
            ("idx_analytics_events_created_at", AnalyticsEvents::CreatedAt),
            ("idx_analytics_events_actor_ip", AnalyticsEvents::ActorIp),
            ("idx_analytics_events_session_id", AnalyticsEvents::SessionId),
        ] {
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name(name)
                        .table(AnalyticsEvents::Table)
                        .col(column)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AnalyticsEvents::Table).if_exists().to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AnalyticsEvents {
    Table,
    Id,
    EventType,
    Payload,
    ActorIp,
    UserAgent,
    SessionId,
    PageUrl,
    Referrer,
    CreatedAt,
}
