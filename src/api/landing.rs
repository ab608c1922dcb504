//! Landing page API endpoints
//!
//! - POST /api/v1/admin/landing-pages - Generate and store a page
//! - GET /api/v1/admin/landing-pages?niche=&limit=
//! - GET /api/v1/landing/{slug} - Public page with related links

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState};
use crate::models::{GenerateLandingPageInput, LandingPage};
use crate::services::LandingPageView;

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub niche: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

pub fn admin_router() -> Router<AppState> {
    Router::new().route("/", get(list_pages).post(generate_page))
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/{slug}", get(get_page))
}

async fn generate_page(
    State(state): State<AppState>,
    Json(input): Json<GenerateLandingPageInput>,
) -> Result<(StatusCode, Json<LandingPageView>), ApiError> {
    let view = state.landing_page_service.generate(input).await?;
    tracing::info!("Landing page '{}' generated", view.page.slug);
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_pages(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<LandingPage>>, ApiError> {
    let niche = query.niche.as_deref().filter(|n| !n.trim().is_empty());
    Ok(Json(state.landing_page_service.list(niche, query.limit).await?))
}

async fn get_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<LandingPageView>, ApiError> {
    state
        .landing_page_service
        .get(&slug)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Landing page not found"))
}
