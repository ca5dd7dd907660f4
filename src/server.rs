//! # Server Configuration
//!
//! Application state, router assembly and the serve loop for site-pulse.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    http::{HeaderName, Method, header},
    middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::analytics::Aggregator;
use crate::auth::{NonceIssuer, WEBHOOK_TOKEN_HEADER, auth_middleware};
use crate::chatbot::ChatbotResponder;
use crate::config::{AppConfig, WebhookAuthMode};
use crate::events::{PAGE_URL_HEADER, SESSION_HEADER};
use crate::handlers;
use crate::repositories::{
    ChatLogRepository, EventRepository, InteractionRepository, SettingsRepository,
};
use crate::telemetry::{REQUEST_ID_HEADER, trace_middleware};
use crate::webhooks::{RecordingSubscriber, WebhookRegistry};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub nonces: NonceIssuer,
    pub chatbot: Arc<ChatbotResponder>,
    pub webhooks: Arc<WebhookRegistry>,
    pub events: EventRepository,
    pub chat_log: ChatLogRepository,
    pub interactions: InteractionRepository,
    pub settings: SettingsRepository,
    pub aggregator: Aggregator,
}

impl AppState {
    /// Build the state with the default webhook subscribers.
    pub fn new(config: Arc<AppConfig>, db: Arc<DatabaseConnection>) -> Self {
        let events = EventRepository::new(db.clone());

        let mut registry = WebhookRegistry::new();
        if config.webhooks.record_events {
            registry.subscribe_all(Arc::new(RecordingSubscriber::new(events.clone())));
        }

        Self {
            nonces: NonceIssuer::from_config(&config),
            chatbot: Arc::new(ChatbotResponder::new(&config.chatbot_name)),
            webhooks: Arc::new(registry),
            events,
            chat_log: ChatLogRepository::new(db.clone()),
            interactions: InteractionRepository::new(db.clone()),
            settings: SettingsRepository::new(db.clone()),
            aggregator: Aggregator::new(db.clone(), config.report_offset()),
            config,
            db,
        }
    }

    /// Replace the webhook registry (extra subscribers, tests).
    pub fn with_webhooks(mut self, registry: WebhookRegistry) -> Self {
        self.webhooks = Arc::new(registry);
        self
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/admin/dashboard", get(handlers::dashboard::get_dashboard))
        .route(
            "/admin/settings",
            get(handlers::settings::get_settings).put(handlers::settings::put_settings),
        )
        .route("/admin/nonce", get(handlers::nonces::admin_nonce))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let public_routes = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/nonces", get(handlers::nonces::public_nonces))
        .route("/ajax", post(handlers::ingest::ajax))
        .route("/webhook/{id}", post(handlers::webhooks::receive_webhook));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(SESSION_HEADER),
            HeaderName::from_static(PAGE_URL_HEADER),
            HeaderName::from_static(WEBHOOK_TOKEN_HEADER),
            REQUEST_ID_HEADER.clone(),
        ]);

    public_routes
        .merge(admin_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Starts the server and serves until `shutdown` fires
pub async fn run_server(
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if config.webhooks.auth == WebhookAuthMode::Open {
        warn!("Webhook relay accepts unauthenticated callers (PULSE_WEBHOOK_AUTH=open)");
    }

    let addr = config.bind_addr().context("Invalid server address")?;
    let state = AppState::new(config.clone(), db);
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Registers the operator bearer scheme referenced by admin paths.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::nonces::public_nonces,
        crate::handlers::nonces::admin_nonce,
        crate::handlers::ingest::ajax,
        crate::handlers::webhooks::receive_webhook,
        crate::handlers::dashboard::get_dashboard,
        crate::handlers::settings::get_settings,
        crate::handlers::settings::put_settings,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::handlers::nonces::NonceBundle,
            crate::handlers::ingest::IngestRequest,
            crate::handlers::ingest::ChatbotReplyData,
            crate::handlers::webhooks::WebhookAcceptResponse,
            crate::handlers::dashboard::DashboardData,
            crate::handlers::settings::SettingsResponse,
            crate::analytics::Overview,
            crate::analytics::TypeCount,
            crate::analytics::RecentTypeActivity,
            crate::analytics::DeviceCount,
            crate::analytics::ChartData,
            crate::chatbot::QuickReply,
            crate::settings::FeatureCounts,
            crate::error::ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "site-pulse API",
        description = "Event ingestion, chatbot and dashboard analytics for the storefront",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
