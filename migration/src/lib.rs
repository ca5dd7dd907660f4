//! Database migrations for the site-pulse event pipeline.
//!
//! Each pipeline table (events, chat interactions, interaction samples) and the
//! feature-settings blob lives in its own migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000001_create_analytics_events;
mod m2025_06_01_000002_create_chat_interactions;
mod m2025_06_01_000003_create_interaction_samples;
mod m2025_06_01_000004_create_site_settings;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000001_create_analytics_events::Migration),
            Box::new(m2025_06_01_000002_create_chat_interactions::Migration),
            Box::new(m2025_06_01_000003_create_interaction_samples::Migration),
            Box::new(m2025_06_01_000004_create_site_settings::Migration),
        ]
    }
}
