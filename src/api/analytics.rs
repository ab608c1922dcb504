//! Analytics endpoint
//!
//! - GET /api/v1/admin/analytics

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::api::middleware::{ApiError, AppState};
use crate::services::ContentReport;

#[derive(Debug, Serialize)]
pub struct RequestStatsReport {
    pub total_requests: u64,
    pub avg_response_time_us: f64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    #[serde(flatten)]
    pub content: ContentReport,
    pub requests: RequestStatsReport,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_analytics))
}

async fn get_analytics(State(state): State<AppState>) -> Result<Json<AnalyticsResponse>, ApiError> {
    let content = state
        .analytics_service
        .report()
        .await
        .map_err(ApiError::internal_error)?;
    let stats = &state.request_stats;

    Ok(Json(AnalyticsResponse {
        content,
        requests: RequestStatsReport {
            total_requests: stats.total_requests(),
            avg_response_time_us: stats.avg_response_time_us(),
            uptime_seconds: stats.uptime_seconds(),
        },
    }))
}
