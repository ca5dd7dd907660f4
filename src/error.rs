//! # Error Handling
//!
//! Domain errors raised by the pipeline and the API error type that renders
//! them as the `{success:false, data:{...}}` envelope with trace ID propagation.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry;

/// Failure taxonomy of the ingestion pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or invalid nonce, or insufficient privilege.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// A required field is absent or a value is out of range.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The store rejected the write or the query.
    #[error("storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),
    /// A payload string could not be parsed as JSON.
    #[error("payload could not be decoded: {0}")]
    Decode(String),
}

impl PipelineError {
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth(message.into())
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Label used for failure counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Validation(_) => "validation",
            Self::Storage(_) => "storage",
            Self::Decode(_) => "decode",
        }
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Correlation trace ID for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            trace_id: Self::current_trace_id(),
        }
    }

    /// Extract the current trace ID (falls back to a generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (
            status,
            axum::Json(json!({
                "success": false,
                "data": self,
            })),
        )
            .into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Auth(message) => {
                Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
            }
            PipelineError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
            }
            PipelineError::Decode(message) => {
                Self::new(StatusCode::BAD_REQUEST, "DECODE_FAILED", message)
            }
            PipelineError::Storage(db_err) => db_err.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a not found error (404)
pub fn not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::{Value, json};

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
    }

    #[test]
    fn test_pipeline_error_mapping() {
        let auth: ApiError = PipelineError::auth("Invalid nonce").into();
        assert_eq!(auth.status, StatusCode::UNAUTHORIZED);
        assert_eq!(auth.code, Box::from("UNAUTHORIZED"));
        assert_eq!(auth.message, Box::from("Invalid nonce"));

        let validation: ApiError = PipelineError::validation("event is required").into();
        assert_eq!(validation.status, StatusCode::BAD_REQUEST);
        assert_eq!(validation.code, Box::from("VALIDATION_FAILED"));

        let storage: ApiError =
            PipelineError::Storage(sea_orm::DbErr::Custom("disk full".into())).into();
        assert_eq!(storage.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(storage.code, Box::from("STORAGE_ERROR"));
        assert!(!storage.message.contains("disk full"));
    }

    #[test]
    fn test_pipeline_error_kind_labels() {
        assert_eq!(PipelineError::auth("x").kind(), "auth");
        assert_eq!(PipelineError::validation("x").kind(), "validation");
        assert_eq!(PipelineError::Decode("x".into()).kind(), "decode");
        assert_eq!(
            PipelineError::Storage(sea_orm::DbErr::Custom("x".into())).kind(),
            "storage"
        );
    }

    #[test]
    fn test_from_anyhow() {
        let api_error: ApiError = anyhow::anyhow!("Something went wrong").into();

        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.message, Box::from("An internal error occurred"));
    }

    #[test]
    fn test_database_error_mapping() {
        let api_error: ApiError = sea_orm::DbErr::RecordNotFound("test_record".to_string()).into();

        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert!(api_error.message.contains("test_record"));
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Test");

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[tokio::test]
    async fn test_trace_id_taken_from_active_context() {
        let context = telemetry::TraceContext {
            trace_id: "req-42".to_string(),
        };
        let error = telemetry::with_trace_context(context, async { unauthorized(None) }).await;

        assert_eq!(error.trace_id.as_deref(), Some("req-42"));
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let error: ApiError = PipelineError::validation("Missing required field 'event'").into();
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["data"]["code"], json!("VALIDATION_FAILED"));
        assert_eq!(body["data"]["message"], json!("Missing required field 'event'"));
        assert!(body["data"].get("details").is_none());
        assert!(body["data"]["trace_id"].is_string());
        assert!(body["data"].get("status").is_none());
    }
}
