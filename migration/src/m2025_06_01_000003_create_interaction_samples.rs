//! Migration to create the interaction_samples (heatmap) table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(InteractionSamples::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InteractionSamples::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(InteractionSamples::InteractionType)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(ColumnDef::new(InteractionSamples::Payload).json().not_null())
                    .col(
                        ColumnDef::new(InteractionSamples::PageUrl)
                            .string_len(500)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InteractionSamples::ActorIp)
                            .string_len(45)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InteractionSamples::ViewportWidth)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(InteractionSamples::ViewportHeight)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(InteractionSamples::DeviceType)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InteractionSamples::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        for (name, column) in [
            (
                "idx_interaction_samples_interaction_type",
                InteractionSamples::InteractionType,
            ),
            ("idx_interaction_samples_page_url", InteractionSamples::PageUrl),
            ("idx_interaction_samples_created_at", InteractionSamples::CreatedAt),
            ("idx_interaction_samples_device_type", InteractionSamples::DeviceType),
        ] {
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name(name)
                        .table(InteractionSamples::Table)
                        .col(column)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(InteractionSamples::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum InteractionSamples {
    Table,
    Id,
    InteractionType,
    Payload,
    PageUrl,
    ActorIp,
    ViewportWidth,
    ViewportHeight,
    DeviceType,
    CreatedAt,
}
