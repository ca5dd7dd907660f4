//! # Authentication and Authorization
//!
//! Per-purpose nonces for ingestion calls, operator bearer authentication for
//! admin endpoints and the optional shared token on the webhook relay.

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use utoipa::ToSchema;

use crate::config::{AppConfig, WebhookAuthMode};
use crate::error::{ApiError, PipelineError, unauthorized};
use crate::server::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Hex characters kept from the HMAC digest.
const NONCE_LEN: usize = 10;

pub const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";

/// The action a nonce authorizes. A nonce minted for one purpose never
/// verifies for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NoncePurpose {
    Tracking,
    Heatmap,
    Chatbot,
    Admin,
}

impl NoncePurpose {
    /// Purposes handed out to anonymous page visitors.
    pub const PUBLIC: [NoncePurpose; 3] = [Self::Tracking, Self::Heatmap, Self::Chatbot];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tracking => "tracking",
            Self::Heatmap => "heatmap",
            Self::Chatbot => "chatbot",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for NoncePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateless nonce minting and verification.
///
/// A nonce is the truncated HMAC-SHA256 of `(purpose, tick)` where a tick is
/// half the configured lifetime; it verifies during its own tick and the next.
#[derive(Clone)]
pub struct NonceIssuer {
    secret: Arc<[u8]>,
    tick_seconds: i64,
}

impl fmt::Debug for NonceIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonceIssuer")
            .field("secret", &"[REDACTED]")
            .field("tick_seconds", &self.tick_seconds)
            .finish()
    }
}

impl NonceIssuer {
    pub fn new(secret: &str, lifetime_seconds: u64) -> Self {
        let tick_seconds = i64::try_from(lifetime_seconds / 2).unwrap_or(i64::MAX).max(1);
        Self {
            secret: Arc::from(secret.as_bytes()),
            tick_seconds,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.nonce_key(), config.nonce_lifetime_seconds)
    }

    fn tick(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.tick_seconds)
    }

    fn token(&self, purpose: NoncePurpose, tick: i64) -> Result<String, PipelineError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| PipelineError::auth("nonce key rejected"))?;
        mac.update(purpose.as_str().as_bytes());
        mac.update(b"|");
        mac.update(tick.to_string().as_bytes());
        let digest = hex::encode(mac.finalize().into_bytes());
        Ok(digest[..NONCE_LEN].to_string())
    }

    pub fn issue(&self, purpose: NoncePurpose) -> Result<String, PipelineError> {
        self.issue_at(purpose, Utc::now())
    }

    pub fn issue_at(&self, purpose: NoncePurpose, now: DateTime<Utc>) -> Result<String, PipelineError> {
        self.token(purpose, self.tick(now))
    }

    /// Check `candidate` for `purpose`; missing or stale nonces are an auth failure.
    pub fn verify(&self, purpose: NoncePurpose, candidate: Option<&str>) -> Result<(), PipelineError> {
        self.verify_at(purpose, candidate, Utc::now())
    }

    pub fn verify_at(
        &self,
        purpose: NoncePurpose,
        candidate: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let candidate = candidate
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| PipelineError::auth("Missing nonce"))?;

        let current = self.tick(now);
        for tick in [current, current - 1] {
            let expected = self.token(purpose, tick)?;
            if bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())) {
                return Ok(());
            }
        }

        Err(PipelineError::auth("Invalid nonce"))
    }
}

/// Marker type for authenticated operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Rejects requests that do not carry a configured operator bearer token.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    verify_operator(&config, request.headers()).map_err(ApiError::from)?;
    tracing::debug!("Authenticated operator request");

    request.extensions_mut().insert(OperatorAuth);
    Ok(next.run(request).await)
}

/// Validate the `Authorization: Bearer` header against the operator tokens.
pub fn verify_operator(config: &AppConfig, headers: &HeaderMap) -> Result<(), PipelineError> {
    let token = extract_bearer_token(headers)?;
    let is_valid = config
        .operator_tokens
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if is_valid {
        Ok(())
    } else {
        Err(PipelineError::auth("Invalid bearer token"))
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, PipelineError> {
    headers
        .get(AUTHORIZATION)
        .ok_or_else(|| PipelineError::auth("Missing Authorization header"))?
        .to_str()
        .map_err(|_| PipelineError::auth("Invalid Authorization header"))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| PipelineError::auth("Authorization header must use Bearer scheme"))
}

/// Enforce the configured webhook authentication mode.
pub fn verify_webhook_caller(config: &AppConfig, headers: &HeaderMap) -> Result<(), PipelineError> {
    match config.webhooks.auth {
        WebhookAuthMode::Open => Ok(()),
        WebhookAuthMode::Token => {
            let expected = config
                .webhooks
                .token
                .as_deref()
                .filter(|token| !token.is_empty())
                .ok_or_else(|| PipelineError::auth("Webhook token not configured"))?;

            let presented = headers
                .get(WEBHOOK_TOKEN_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .or_else(|| extract_bearer_token(headers).ok().map(str::to_string))
                .ok_or_else(|| PipelineError::auth("Missing webhook token"))?;

            if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
                Ok(())
            } else {
                Err(PipelineError::auth("Invalid webhook token"))
            }
        }
    }
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{HeaderValue, Request, StatusCode},
        routing::get,
    };
    use chrono::{Duration, TimeZone};
    use tower::ServiceExt;

    fn create_test_config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            operator_tokens: vec!["test-token-123".to_string()],
            ..Default::default()
        })
    }

    async fn run_middleware(config: Arc<AppConfig>, request: Request<Body>) -> Response {
        async fn handler(_operator: OperatorAuth) -> &'static str {
            "OK"
        }

        Router::new()
            .route("/test", get(handler))
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&config),
                auth_middleware,
            ))
            .oneshot(request)
            .await
            .unwrap()
    }

    fn issuer() -> NonceIssuer {
        NonceIssuer::new("unit-test-nonce-secret", 86_400)
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, hour, 0, 0).unwrap()
    }

    #[test]
    fn nonce_has_fixed_length_and_is_hex() {
        let nonce = issuer().issue_at(NoncePurpose::Tracking, at(10)).unwrap();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn nonce_verifies_for_its_purpose_only() {
        let issuer = issuer();
        let nonce = issuer.issue_at(NoncePurpose::Tracking, at(10)).unwrap();

        assert!(issuer.verify_at(NoncePurpose::Tracking, Some(&nonce), at(10)).is_ok());
        assert!(matches!(
            issuer.verify_at(NoncePurpose::Chatbot, Some(&nonce), at(10)),
            Err(PipelineError::Auth(_))
        ));
    }

    #[test]
    fn nonce_survives_one_tick_then_expires() {
        let issuer = issuer();
        let minted = at(1);
        let nonce = issuer.issue_at(NoncePurpose::Heatmap, minted).unwrap();

        assert!(issuer
            .verify_at(NoncePurpose::Heatmap, Some(&nonce), minted + Duration::hours(12))
            .is_ok());
        assert!(issuer
            .verify_at(NoncePurpose::Heatmap, Some(&nonce), minted + Duration::hours(25))
            .is_err());
    }

    #[test]
    fn missing_or_foreign_nonce_rejected() {
        let issuer = issuer();
        assert!(issuer.verify_at(NoncePurpose::Admin, None, at(3)).is_err());
        assert!(issuer.verify_at(NoncePurpose::Admin, Some("  "), at(3)).is_err());

        let other = NonceIssuer::new("a-different-secret-value", 86_400)
            .issue_at(NoncePurpose::Admin, at(3))
            .unwrap();
        assert!(issuer.verify_at(NoncePurpose::Admin, Some(&other), at(3)).is_err());
    }

    #[test]
    fn debug_output_hides_secret() {
        let rendered = format!("{:?}", issuer());
        assert!(!rendered.contains("unit-test-nonce-secret"));
    }

    #[tokio::test]
    async fn missing_auth_header_returns_401() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_auth_scheme_returns_401() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Basic dGVzdDoxMjM=")
            .body(Body::empty())
            .unwrap();

        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_token_returns_401() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Bearer wrong-token")
            .body(Body::empty())
            .unwrap();

        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn multiple_tokens_supported() {
        let config = Arc::new(AppConfig {
            operator_tokens: vec!["token-one".to_string(), "token-two".to_string()],
            ..Default::default()
        });

        for candidate in ["token-one", "token-two"] {
            let request = Request::builder()
                .uri("/test")
                .header("Authorization", format!("Bearer {}", candidate))
                .body(Body::empty())
                .unwrap();

            let response = run_middleware(Arc::clone(&config), request).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[test]
    fn open_webhook_mode_accepts_anyone() {
        let config = AppConfig::default();
        assert!(verify_webhook_caller(&config, &HeaderMap::new()).is_ok());
    }

    #[test]
    fn token_webhook_mode_checks_header_or_bearer() {
        let mut config = AppConfig::default();
        config.webhooks.auth = WebhookAuthMode::Token;
        config.webhooks.token = Some("hook-secret".to_string());

        assert!(verify_webhook_caller(&config, &HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(WEBHOOK_TOKEN_HEADER, HeaderValue::from_static("hook-secret"));
        assert!(verify_webhook_caller(&config, &headers).is_ok());

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer hook-secret"));
        assert!(verify_webhook_caller(&config, &headers).is_ok());

        let mut headers = HeaderMap::new();
        headers.insert(WEBHOOK_TOKEN_HEADER, HeaderValue::from_static("nope"));
        assert!(verify_webhook_caller(&config, &headers).is_err());
    }
}
