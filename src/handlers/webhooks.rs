//! # Webhook Handlers
//!
//! Public relay endpoint. Bodies are fanned out through the
//! [`WebhookRegistry`](crate::webhooks::WebhookRegistry); subscriber failures
//! are logged and never change the response.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use utoipa::{IntoParams, ToSchema};

use crate::auth::verify_webhook_caller;
use crate::error::{ApiError, not_found};
use crate::events::RequestMetadata;
use crate::server::AppState;
use crate::webhooks::{WebhookDelivery, is_valid_hook_id};

/// Path parameter for the hook identifier
#[derive(Debug, Deserialize, IntoParams)]
pub struct HookPath {
    /// Hook identifier (`[A-Za-z0-9_-]+`)
    #[param(min_length = 1, example = "order_paid")]
    pub id: String,
}

/// Webhook accept response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAcceptResponse {
    pub success: bool,
}

/// Parse the body as JSON; anything else is relayed as `null`.
fn parse_webhook_body(bytes: &[u8]) -> JsonValue {
    if bytes.is_empty() {
        return JsonValue::Null;
    }
    serde_json::from_slice(bytes).unwrap_or_else(|err| {
        debug!(error = %err, "Webhook body is not JSON; relaying null");
        JsonValue::Null
    })
}

/// Relay an inbound webhook
#[utoipa::path(
    post,
    path = "/webhook/{id}",
    params(HookPath),
    request_body(content = Object, description = "Arbitrary JSON body"),
    responses(
        (status = 200, description = "Webhook accepted", body = WebhookAcceptResponse),
        (status = 401, description = "Webhook token missing or invalid", body = ApiError),
        (status = 404, description = "Invalid hook identifier", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(HookPath { id }): Path<HookPath>,
    meta: RequestMetadata,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAcceptResponse>, ApiError> {
    if !is_valid_hook_id(&id) {
        return Err(not_found("Unknown webhook"));
    }

    verify_webhook_caller(&state.config, &headers).map_err(|err| {
        warn!(hook_id = %id, error = %err, "Rejected webhook caller");
        ApiError::from(err)
    })?;

    let delivery = WebhookDelivery {
        hook_id: id,
        body: parse_webhook_body(&body),
        meta,
        received_at: Utc::now(),
    };
    state.webhooks.dispatch(&delivery).await;

    Ok(Json(WebhookAcceptResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_json_becomes_null() {
        assert_eq!(parse_webhook_body(b"not json"), JsonValue::Null);
        assert_eq!(parse_webhook_body(b""), JsonValue::Null);
        assert_eq!(parse_webhook_body(br#"{"a":1}"#)["a"], 1);
    }
}
