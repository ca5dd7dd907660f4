//! # Nonce Handlers
//!
//! Issue per-purpose nonces for the instrumentation script and the admin UI.

use std::collections::BTreeMap;

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{NoncePurpose, OperatorAuth};
use crate::error::ApiError;
use crate::handlers::types::Envelope;
use crate::server::AppState;

/// Nonces keyed by purpose
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NonceBundle {
    pub nonces: BTreeMap<String, String>,
    /// Upper bound on how long each nonce stays valid
    pub lifetime_seconds: u64,
}

fn bundle(state: &AppState, purposes: &[NoncePurpose]) -> Result<NonceBundle, ApiError> {
    let mut nonces = BTreeMap::new();
    for purpose in purposes {
        nonces.insert(purpose.as_str().to_string(), state.nonces.issue(*purpose)?);
    }
    Ok(NonceBundle {
        nonces,
        lifetime_seconds: state.config.nonce_lifetime_seconds,
    })
}

/// Nonces for the public ingestion actions
#[utoipa::path(
    get,
    path = "/nonces",
    responses(
        (status = 200, description = "Tracking, heatmap and chatbot nonces", body = NonceBundle)
    ),
    tag = "ingest"
)]
pub async fn public_nonces(
    State(state): State<AppState>,
) -> Result<Json<Envelope<NonceBundle>>, ApiError> {
    Ok(Json(Envelope::ok(bundle(&state, &NoncePurpose::PUBLIC)?)))
}

/// Nonce for the admin ajax actions
#[utoipa::path(
    get,
    path = "/admin/nonce",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Admin nonce", body = NonceBundle),
        (status = 401, description = "Missing or invalid operator token", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn admin_nonce(
    State(state): State<AppState>,
    _operator: OperatorAuth,
) -> Result<Json<Envelope<NonceBundle>>, ApiError> {
    Ok(Json(Envelope::ok(bundle(&state, &[NoncePurpose::Admin])?)))
}
