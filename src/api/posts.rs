//! Post API endpoints
//!
//! Admin:
//! - POST /api/v1/admin/posts
//! - GET /api/v1/admin/posts
//! - GET /api/v1/admin/posts/{id} (with per-locale translation state)
//! - PUT /api/v1/admin/posts/{id}
//! - DELETE /api/v1/admin/posts/{id} (archives)
//!
//! Public:
//! - GET /api/v1/posts?locale=&page=&page_size=
//! - GET /api/v1/posts/{locale}/{slug}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::api::common::{default_page, default_page_size, AdminPaginationQuery};
use crate::api::middleware::{ApiError, AppState};
use crate::models::{CreatePostInput, ListParams, PagedResult, Post, TranslationState, UpdatePostInput};

/// Admin view of a post
#[derive(Debug, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: Post,
    /// Translation state per target locale that has any record
    pub translations: BTreeMap<String, TranslationState>,
}

/// Public list query
#[derive(Debug, Deserialize)]
pub struct PublicListQuery {
    pub locale: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts).post(create_post))
        .route("/{id}", get(get_post).put(update_post).delete(archive_post))
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_published))
        .route("/{locale}/{slug}", get(get_published))
}

async fn create_post(
    State(state): State<AppState>,
    Json(input): Json<CreatePostInput>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    let post = state.post_service.create(input).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<AdminPaginationQuery>,
) -> Result<Json<PagedResult<Post>>, ApiError> {
    Ok(Json(state.post_service.list(&query.params()).await?))
}

async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PostDetail>, ApiError> {
    let post = state
        .post_service
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Post {} not found", id)))?;
    let translations = state.tracker().status_overview(id).await?;

    Ok(Json(PostDetail { post, translations }))
}

async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<UpdatePostInput>,
) -> Result<Json<Post>, ApiError> {
    Ok(Json(state.post_service.update(id, input).await?))
}

async fn archive_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Post>, ApiError> {
    Ok(Json(state.post_service.archive(id).await?))
}

async fn list_published(
    State(state): State<AppState>,
    Query(query): Query<PublicListQuery>,
) -> Result<Json<PagedResult<Post>>, ApiError> {
    let locale = query.locale.as_deref().filter(|l| !l.trim().is_empty());
    Ok(Json(
        state
            .post_service
            .list_published(locale, &ListParams::new(query.page, query.page_size))
            .await?,
    ))
}

async fn get_published(
    State(state): State<AppState>,
    Path((locale, slug)): Path<(String, String)>,
) -> Result<Json<Post>, ApiError> {
    state
        .post_service
        .get_published(&locale, &slug)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Post not found"))
}
