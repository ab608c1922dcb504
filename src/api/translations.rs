//! Translation API endpoints (all admin)
//!
//! - POST /api/v1/admin/posts/{id}/translations - Request a translation (202)
//! - GET /api/v1/admin/posts/{id}/translations - History, or `?locale=` state
//! - GET /api/v1/admin/translations/{id}
//! - POST /api/v1/admin/translations/{id}/complete
//! - POST /api/v1/admin/translations/{id}/fail

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{TranslationRecord, TranslationState};

#[derive(Debug, Deserialize)]
pub struct RequestTranslationBody {
    pub target_locale: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    pub result_post_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct FailBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub locale: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LocaleStatus {
    pub post_id: i64,
    pub target_locale: String,
    pub state: TranslationState,
}

/// Routes nested under `/admin/posts`
pub fn post_router() -> Router<AppState> {
    Router::new().route(
        "/{id}/translations",
        get(history).post(request_translation),
    )
}

/// Routes nested under `/admin/translations`
pub fn record_router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_record))
        .route("/{id}/complete", post(complete))
        .route("/{id}/fail", post(fail))
}

/// Records the pending request and starts the job; the response does not
/// wait for it.
async fn request_translation(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Json(body): Json<RequestTranslationBody>,
) -> Result<(StatusCode, Json<TranslationRecord>), ApiError> {
    let (record, _job) = state
        .translation_pipeline
        .start(post_id, &body.target_locale)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

async fn history(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    match query.locale.filter(|l| !l.trim().is_empty()) {
        Some(locale) => {
            let state_for = state.tracker().status_for(post_id, &locale).await?;
            Ok(Json(LocaleStatus {
                post_id,
                target_locale: locale,
                state: state_for,
            })
            .into_response())
        }
        None => Ok(Json(state.tracker().history(post_id).await?).into_response()),
    }
}

async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TranslationRecord>, ApiError> {
    Ok(Json(state.tracker().get(id).await?))
}

async fn complete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<CompleteBody>,
) -> Result<Json<TranslationRecord>, ApiError> {
    Ok(Json(
        state
            .tracker()
            .complete_translation(id, body.result_post_id)
            .await?,
    ))
}

async fn fail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<FailBody>,
) -> Result<Json<TranslationRecord>, ApiError> {
    Ok(Json(state.tracker().fail_translation(id, &body.reason).await?))
}
