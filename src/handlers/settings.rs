//! # Feature Settings Handlers

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;
use utoipa::ToSchema;

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::handlers::types::Envelope;
use crate::server::AppState;
use crate::settings::{self, FeatureSettings};

/// Current feature flags with their active/total summary
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SettingsResponse {
    /// Flag name to enabled state
    #[schema(value_type = Object)]
    pub flags: FeatureSettings,
    pub active: usize,
    pub total: usize,
}

impl From<FeatureSettings> for SettingsResponse {
    fn from(flags: FeatureSettings) -> Self {
        Self {
            active: flags.active_count(),
            total: flags.total_count(),
            flags,
        }
    }
}

/// Read the feature flags
#[utoipa::path(
    get,
    path = "/admin/settings",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Feature flags inside the success envelope", body = SettingsResponse),
        (status = 401, description = "Missing or invalid operator token", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn get_settings(
    State(state): State<AppState>,
    _operator: OperatorAuth,
) -> Result<Json<Envelope<SettingsResponse>>, ApiError> {
    let flags = settings::load(&state.settings).await?;
    Ok(Json(Envelope::ok(flags.into())))
}

/// Replace the feature flags. Unknown keys are dropped and missing keys turn off.
#[utoipa::path(
    put,
    path = "/admin/settings",
    security(("bearer_auth" = [])),
    request_body(content = Object, description = "Flag name to truthy value"),
    responses(
        (status = 200, description = "Saved flags inside the success envelope", body = SettingsResponse),
        (status = 401, description = "Missing or invalid operator token", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn put_settings(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    Json(submitted): Json<JsonValue>,
) -> Result<Json<Envelope<SettingsResponse>>, ApiError> {
    let flags = settings::save(&state.settings, &submitted).await?;
    info!(active = flags.active_count(), "Feature settings saved");
    Ok(Json(Envelope::ok(flags.into())))
}
