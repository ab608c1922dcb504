//! Admin authentication endpoints
//!
//! - POST /api/v1/admin/login - Exchange credentials for a session token
//! - POST /api/v1/admin/logout - Clear the session cookie
//! - GET /api/v1/admin/me - Current admin identity (gated)

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::common::ClientIp;
use crate::api::middleware::{ApiError, AppState, AuthenticatedAdmin, SESSION_COOKIE};
use crate::models::AdminIdentity;
use crate::services::verify_password;

/// Request body for admin login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Response for a successful login
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub admin: AdminIdentity,
}

/// Public auth routes
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
}

/// Gated auth routes
pub fn protected_router() -> Router<AppState> {
    Router::new().route("/me", get(me))
}

/// POST /api/v1/admin/login
async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(ip) = ip {
        if state.rate_limiter.is_ip_limited(ip).await {
            tracing::warn!("Login rate limited for IP {}", ip);
            return Err(ApiError::rate_limited("Too many requests, try again later", 60));
        }
        state.rate_limiter.record_ip_request(ip).await;
    }

    let username = body.username.trim().to_string();
    if state.rate_limiter.is_username_limited(&username).await {
        tracing::warn!("Login rate limited for username '{}'", username);
        return Err(ApiError::rate_limited(
            "Too many failed attempts, try again in 15 minutes",
            900,
        ));
    }

    // Argon2 is CPU-bound; keep it off the async workers.
    let hash = state.admin.password_hash.clone();
    let password = body.password;
    let password_ok = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(ApiError::internal_error)?
        .map_err(ApiError::internal_error)?;

    if !password_ok || !username.eq_ignore_ascii_case(&state.admin.username) {
        state.rate_limiter.record_failed_attempt(&username).await;
        tracing::info!("Failed admin login for '{}'", username);
        return Err(ApiError::unauthorized("Invalid username or password"));
    }

    state.rate_limiter.clear_username_attempts(&username).await;

    let issued = state
        .tokens
        .issue(&state.admin.username)
        .map_err(ApiError::internal_error)?;
    let admin = AdminIdentity::from(&issued.claims);
    tracing::info!("Admin '{}' logged in", admin.username);

    let cookie = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE,
        issued.token,
        state.tokens.ttl().num_seconds()
    );
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(ApiError::internal_error)?,
    );

    Ok((
        headers,
        Json(LoginResponse {
            token: issued.token,
            expires_at: issued.expires_at,
            admin,
        }),
    ))
}

/// POST /api/v1/admin/logout
///
/// Tokens are stateless, so this only clears the cookie.
async fn logout() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_static("admin_session=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0"),
    );
    (headers, Json(serde_json::json!({ "success": true })))
}

/// GET /api/v1/admin/me
async fn me(AuthenticatedAdmin(identity): AuthenticatedAdmin) -> Json<AdminIdentity> {
    Json(identity)
}
