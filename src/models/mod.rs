//! # Data Models
//!
//! SeaORM entities for the pipeline tables plus small shared response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod analytics_event;
pub mod chat_interaction;
pub mod interaction_sample;
pub mod site_setting;

pub use analytics_event::Entity as AnalyticsEvent;
pub use chat_interaction::Entity as ChatInteraction;
pub use interaction_sample::Entity as InteractionSample;
pub use site_setting::Entity as SiteSetting;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "site-pulse".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
