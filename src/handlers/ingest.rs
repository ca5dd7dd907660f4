//! # Ingestion Handlers
//!
//! `POST /ajax`: the single action-dispatched endpoint used by the page
//! instrumentation and the admin UI. Every action runs the same steps in
//! order: nonce check, required fields, payload decode, sanitize, insert.

use std::convert::Infallible;

use axum::{
    Form,
    extract::{FromRequest, Request, State},
    http::{HeaderMap, header::CONTENT_TYPE},
    response::Json,
};
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::auth::{NoncePurpose, verify_operator};
use crate::chatbot::{QuickReply, converse};
use crate::error::{ApiError, PipelineError};
use crate::events::{NewEvent, NewInteractionSample, RequestMetadata};
use crate::handlers::dashboard;
use crate::handlers::types::Envelope;
use crate::sanitize::{DecodedPayload, decode_payload, sanitize_text};
use crate::server::AppState;
use crate::settings;

/// Fields accepted by `POST /ajax`; which ones are required depends on `action`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct IngestRequest {
    /// `track_event`, `heatmap_data`, `chatbot_message`, `save_settings` or `get_dashboard_data`
    pub action: Option<String>,
    pub nonce: Option<String>,
    /// Event type for `track_event`
    pub event: Option<String>,
    /// Interaction type for `heatmap_data`
    #[serde(rename = "type")]
    pub interaction_type: Option<String>,
    /// JSON object, or a string holding JSON
    #[schema(value_type = Object)]
    pub data: Option<JsonValue>,
    /// User message for `chatbot_message`
    pub message: Option<String>,
    #[schema(value_type = Object)]
    pub context: Option<JsonValue>,
    /// Flag map for `save_settings`
    #[schema(value_type = Object)]
    pub settings: Option<JsonValue>,
}

/// Raw `POST /ajax` body: JSON or `application/x-www-form-urlencoded`.
///
/// Nothing is typed yet; fields are only interpreted once the nonce has been
/// checked. Bracketed form keys such as `data[page]` or `settings[quick_buy]`
/// are folded into nested objects. An unreadable body yields an empty map,
/// which then fails the nonce check.
pub struct IngestBody(pub Map<String, JsonValue>);

impl<S> FromRequest<S> for IngestBody
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));

        let fields = if is_json {
            match Json::<JsonValue>::from_request(request, state).await {
                Ok(Json(JsonValue::Object(map))) => map,
                Ok(Json(_)) => {
                    debug!("Ajax JSON body is not an object");
                    Map::new()
                }
                Err(rejection) => {
                    debug!(error = %rejection.body_text(), "Ajax JSON body rejected");
                    Map::new()
                }
            }
        } else {
            match Form::<Vec<(String, String)>>::from_request(request, state).await {
                Ok(Form(pairs)) => form_to_json(pairs),
                Err(rejection) => {
                    debug!(error = %rejection.body_text(), "Ajax form body rejected");
                    Map::new()
                }
            }
        };

        Ok(IngestBody(fields))
    }
}

/// Fold `name[a][b]=v` form keys into nested objects; `name[]` appends.
fn form_to_json(pairs: Vec<(String, String)>) -> Map<String, JsonValue> {
    let mut root = Map::new();
    for (key, value) in pairs {
        let (name, path) = split_form_key(&key);
        insert_form_value(&mut root, name, &path, JsonValue::String(value));
    }
    root
}

fn split_form_key(key: &str) -> (&str, Vec<&str>) {
    match key.find('[') {
        Some(open) if open > 0 && key.ends_with(']') => {
            (&key[..open], key[open + 1..key.len() - 1].split("][").collect())
        }
        _ => (key, Vec::new()),
    }
}

fn insert_form_value(map: &mut Map<String, JsonValue>, key: &str, path: &[&str], value: JsonValue) {
    let key = if key.is_empty() {
        map.len().to_string()
    } else {
        key.to_string()
    };
    match path.split_first() {
        None => {
            map.insert(key, value);
        }
        Some((next, rest)) => {
            let entry = map
                .entry(key)
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if !entry.is_object() {
                *entry = JsonValue::Object(Map::new());
            }
            if let JsonValue::Object(child) = entry {
                insert_form_value(child, next, rest, value);
            }
        }
    }
}

/// Nonce purpose guarding each action; `None` for unknown actions.
fn action_purpose(action: &str) -> Option<NoncePurpose> {
    match action {
        "track_event" => Some(NoncePurpose::Tracking),
        "heatmap_data" => Some(NoncePurpose::Heatmap),
        "chatbot_message" => Some(NoncePurpose::Chatbot),
        "save_settings" | "get_dashboard_data" => Some(NoncePurpose::Admin),
        _ => None,
    }
}

/// Nonce check first, then typed field conversion.
fn authenticate(
    state: &AppState,
    action: &str,
    fields: Map<String, JsonValue>,
) -> Result<IngestRequest, PipelineError> {
    let purpose = action_purpose(action)
        .ok_or_else(|| PipelineError::validation(format!("Unknown action '{action}'")))?;
    state
        .nonces
        .verify(purpose, fields.get("nonce").and_then(JsonValue::as_str))?;
    serde_json::from_value(JsonValue::Object(fields))
        .map_err(|err| PipelineError::validation(format!("Malformed request: {err}")))
}

/// Chatbot action result
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatbotReplyData {
    pub response: String,
    pub quick_replies: Vec<QuickReply>,
    /// Reply time as `HH:MM` in the site timezone
    pub timestamp: String,
}

/// Handle one ajax action
#[utoipa::path(
    post,
    path = "/ajax",
    request_body(
        content = IngestRequest,
        description = "Form-encoded or JSON action payload",
        content_type = "application/x-www-form-urlencoded"
    ),
    responses(
        (status = 200, description = "Action succeeded; `data` depends on the action"),
        (status = 400, description = "Unknown action or missing field", body = ApiError),
        (status = 401, description = "Missing or invalid nonce or operator token", body = ApiError),
        (status = 500, description = "Storage failure", body = ApiError)
    ),
    tag = "ingest"
)]
pub async fn ajax(
    State(state): State<AppState>,
    meta: RequestMetadata,
    headers: HeaderMap,
    IngestBody(fields): IngestBody,
) -> Result<Json<Envelope<JsonValue>>, ApiError> {
    let action = fields
        .get("action")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();

    let result = match authenticate(&state, &action, fields) {
        Ok(request) => match action.as_str() {
            "track_event" => track_event(&state, request, meta).await,
            "heatmap_data" => heatmap_data(&state, request, meta).await,
            "chatbot_message" => chatbot_message(&state, request, meta).await,
            "save_settings" => save_settings(&state, &headers, request).await,
            _ => dashboard_data(&state, &headers).await,
        },
        Err(err) => Err(err),
    };

    match result {
        Ok(data) => Ok(Json(Envelope::ok(data))),
        Err(err) => {
            counter!("ingest_failures_total", "kind" => err.kind()).increment(1);
            warn!(action = %action, error = %err, "Ajax action failed");
            Err(err.into())
        }
    }
}

/// Sanitized, non-empty text field or a validation error naming it.
fn required_text(value: Option<&str>, field: &str) -> Result<String, PipelineError> {
    value
        .map(sanitize_text)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| PipelineError::validation(format!("Missing required field '{field}'")))
}

fn decode_logged(raw: Option<&JsonValue>, action: &str) -> DecodedPayload {
    let decoded = decode_payload(raw);
    if let Some(err) = &decoded.error {
        counter!("ingest_decode_failures_total", "action" => action.to_string()).increment(1);
        warn!(action, error = %err, "Payload could not be decoded; storing empty payload");
    }
    decoded
}

async fn track_event(
    state: &AppState,
    request: IngestRequest,
    meta: RequestMetadata,
) -> Result<JsonValue, PipelineError> {
    let event_type = required_text(request.event.as_deref(), "event")?;
    let decoded = decode_logged(request.data.as_ref(), "track_event");

    let id = state
        .events
        .insert(NewEvent {
            event_type: event_type.clone(),
            payload: decoded.payload,
            meta,
        })
        .await?;

    counter!("events_ingested_total", "table" => "analytics_events").increment(1);
    debug!(id, event_type = %event_type, "Event tracked");
    Ok(json!({ "message": "Event tracked" }))
}

async fn heatmap_data(
    state: &AppState,
    request: IngestRequest,
    meta: RequestMetadata,
) -> Result<JsonValue, PipelineError> {
    let interaction_type = required_text(request.interaction_type.as_deref(), "type")?;
    let decoded = decode_logged(request.data.as_ref(), "heatmap_data");

    let id = state
        .interactions
        .insert(NewInteractionSample::from_payload(
            interaction_type,
            decoded.payload,
            meta,
        ))
        .await?;

    counter!("events_ingested_total", "table" => "interaction_samples").increment(1);
    debug!(id, "Interaction sample stored");
    Ok(json!({ "message": "Heatmap data saved" }))
}

async fn chatbot_message(
    state: &AppState,
    request: IngestRequest,
    meta: RequestMetadata,
) -> Result<JsonValue, PipelineError> {
    let message = required_text(request.message.as_deref(), "message")?;

    let (reply, id) = converse(&state.chatbot, &state.chat_log, message, meta).await?;

    counter!("events_ingested_total", "table" => "chat_interactions").increment(1);
    debug!(id, topic = ?reply.topic, "Chatbot replied");

    let timestamp = Utc::now()
        .with_timezone(&state.aggregator.offset())
        .format("%H:%M")
        .to_string();
    let data = ChatbotReplyData {
        response: reply.response,
        quick_replies: reply.quick_replies,
        timestamp,
    };
    serde_json::to_value(data).map_err(|err| PipelineError::Decode(err.to_string()))
}

/// Admin actions need an operator bearer token on top of the admin nonce.
fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<(), PipelineError> {
    verify_operator(&state.config, headers)
        .map_err(|_| PipelineError::auth("Insufficient permissions"))
}

async fn save_settings(
    state: &AppState,
    headers: &HeaderMap,
    request: IngestRequest,
) -> Result<JsonValue, PipelineError> {
    authorize_admin(state, headers)?;

    let submitted = match request.settings {
        Some(JsonValue::String(text)) => serde_json::from_str(&text)
            .map_err(|err| PipelineError::Decode(err.to_string()))?,
        Some(value) => value,
        None => JsonValue::Object(Map::new()),
    };
    let flags = settings::save(&state.settings, &submitted).await?;

    info!(active = flags.active_count(), "Feature settings saved");
    Ok(json!({
        "message": "Settings saved",
        "settings": flags.to_json(),
        "active": flags.active_count(),
        "total": flags.total_count(),
    }))
}

async fn dashboard_data(state: &AppState, headers: &HeaderMap) -> Result<JsonValue, PipelineError> {
    authorize_admin(state, headers)?;
    let data = dashboard::collect(state).await?;
    serde_json::to_value(data).map_err(|err| PipelineError::Decode(err.to_string()))
}
