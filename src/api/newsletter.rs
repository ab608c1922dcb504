//! Newsletter API endpoints
//!
//! Public:
//! - POST /api/v1/newsletter/subscribe
//! - GET /api/v1/newsletter/verify?token=
//! - POST /api/v1/newsletter/unsubscribe
//! - GET /api/v1/newsletter/unsubscribe?token= (link in every issue)
//!
//! Admin:
//! - GET /api/v1/admin/subscribers
//! - POST /api/v1/admin/newsletter/send

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::AdminPaginationQuery;
use crate::api::middleware::{ApiError, AppState};
use crate::models::{PagedResult, Subscriber};

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub recipients: usize,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/verify", get(verify))
        .route("/unsubscribe", post(unsubscribe).get(unsubscribe_link))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/subscribers", get(list_subscribers))
        .route("/newsletter/send", post(send_newsletter))
}

async fn subscribe(
    State(state): State<AppState>,
    Json(body): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<Subscriber>), ApiError> {
    let subscriber = state.subscriber_service.subscribe(&body.email).await?;
    Ok((StatusCode::CREATED, Json(subscriber)))
}

async fn verify(
    State(state): State<AppState>,
    Query(query): Query<TokenRequest>,
) -> Result<Json<Subscriber>, ApiError> {
    Ok(Json(state.subscriber_service.verify(&query.token).await?))
}

async fn unsubscribe(
    State(state): State<AppState>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<Subscriber>, ApiError> {
    Ok(Json(state.subscriber_service.unsubscribe(&body.token).await?))
}

async fn unsubscribe_link(
    State(state): State<AppState>,
    Query(query): Query<TokenRequest>,
) -> Result<Json<Subscriber>, ApiError> {
    Ok(Json(state.subscriber_service.unsubscribe(&query.token).await?))
}

async fn list_subscribers(
    State(state): State<AppState>,
    Query(query): Query<AdminPaginationQuery>,
) -> Result<Json<PagedResult<Subscriber>>, ApiError> {
    Ok(Json(state.subscriber_service.list(&query.params()).await?))
}

/// Responds once recipients are counted; delivery continues detached.
async fn send_newsletter(
    State(state): State<AppState>,
    Json(body): Json<SendRequest>,
) -> Result<(StatusCode, Json<SendResponse>), ApiError> {
    let (recipients, _delivery) = state
        .subscriber_service
        .send_newsletter(&body.subject, &body.body)
        .await?;
    tracing::info!("Newsletter '{}' queued for {} recipients", body.subject.trim(), recipients);
    Ok((StatusCode::ACCEPTED, Json(SendResponse { recipients })))
}
