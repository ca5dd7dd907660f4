//! # Dashboard Handlers
//!
//! Read-only aggregate numbers for the admin dashboard.

use axum::{extract::State, response::Json};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::analytics::{ChartData, DeviceCount, Overview, RecentTypeActivity, TimeWindow};
use crate::auth::OperatorAuth;
use crate::error::{ApiError, PipelineError};
use crate::handlers::types::Envelope;
use crate::server::AppState;
use crate::settings::{self, FeatureCounts};

/// Lookback of the "recent events" table.
const RECENT_LOOKBACK_HOURS: i64 = 24;
/// Rows shown in the "recent events" table.
const RECENT_LIMIT: u64 = 10;
/// Days covered by the chart and the device breakdown.
const CHART_DAYS: u32 = 7;

/// Everything the dashboard renders
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DashboardData {
    pub overview: Overview,
    /// Event types seen in the last 24 hours, busiest first
    pub recent_events: Vec<RecentTypeActivity>,
    /// Daily event counts for the last seven days, oldest first
    pub chart: ChartData,
    pub chat_messages_today: u64,
    /// Interaction samples per device class over the last seven days
    pub device_breakdown: Vec<DeviceCount>,
    pub features: FeatureCounts,
}

/// Gather the dashboard numbers. Missing tables read as zero.
pub async fn collect(state: &AppState) -> Result<DashboardData, PipelineError> {
    let now = Utc::now();
    let aggregator = &state.aggregator;

    let overview = aggregator.overview_at(now).await?;
    let recent_events = aggregator
        .recent_event_types(
            TimeWindow::lookback(now, Duration::hours(RECENT_LOOKBACK_HOURS)),
            RECENT_LIMIT,
        )
        .await?;
    let chart = aggregator.daily_series_at(now, CHART_DAYS).await?.chart();
    let device_breakdown = aggregator
        .device_breakdown(TimeWindow::last_days(now, aggregator.offset(), CHART_DAYS))
        .await?;
    let features = FeatureCounts::from(&settings::load(&state.settings).await?);

    Ok(DashboardData {
        chat_messages_today: overview.chat_messages_today,
        overview,
        recent_events,
        chart,
        device_breakdown,
        features,
    })
}

/// Dashboard aggregates
#[utoipa::path(
    get,
    path = "/admin/dashboard",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Dashboard data inside the success envelope", body = DashboardData),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 500, description = "Storage failure", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn get_dashboard(
    State(state): State<AppState>,
    _operator: OperatorAuth,
) -> Result<Json<Envelope<DashboardData>>, ApiError> {
    let data = collect(&state).await?;
    Ok(Json(Envelope::ok(data)))
}
