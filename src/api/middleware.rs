//! API middleware and shared state
//!
//! Contains:
//! - `AppState`, the services shared by every handler
//! - `ApiError`, the JSON error shape and status mapping
//! - the admin auth gate (signed session token validation)
//! - request statistics for the analytics report

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::db::repositories::Repositories;
use crate::models::AdminIdentity;
use crate::services::landing_page::LandingPageError;
use crate::services::notification::{DynEmailSender, NotificationDispatcher};
use crate::services::post::PostServiceError;
use crate::services::subscriber::SubscriberServiceError;
use crate::services::text_generation::DynTextGenerator;
use crate::services::{
    AnalyticsService, AuthError, LandingPageService, LoginRateLimiter, PostService,
    SessionTokenService, SubscriberService, TrackerError, TranslationPipeline, TranslationTracker,
};

/// Name of the cookie carrying the admin session token
pub const SESSION_COOKIE: &str = "admin_session";

// ============================================================================
// Request Statistics
// ============================================================================

/// Lightweight request statistics using atomic operations (no locks)
pub struct RequestStats {
    total_requests: AtomicU64,
    /// Sum of response times, for the average
    total_response_time_us: AtomicU64,
    start_time: Instant,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, duration_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn avg_response_time_us(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.total_response_time_us.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Configured admin credentials
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub username: String,
    /// Argon2 PHC string
    pub password_hash: String,
}

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<SessionTokenService>,
    pub admin: Arc<AdminCredentials>,
    pub rate_limiter: Arc<LoginRateLimiter>,
    pub post_service: Arc<PostService>,
    pub translation_pipeline: Arc<TranslationPipeline>,
    pub subscriber_service: Arc<SubscriberService>,
    pub landing_page_service: Arc<LandingPageService>,
    pub analytics_service: Arc<AnalyticsService>,
    pub request_stats: Arc<RequestStats>,
}

impl AppState {
    /// Wire the services from configuration, repositories and collaborators.
    pub fn new(
        config: &Config,
        repos: Repositories,
        generator: DynTextGenerator,
        sender: DynEmailSender,
    ) -> anyhow::Result<Self> {
        let tokens = SessionTokenService::new(
            config.auth.signing_secret.as_bytes(),
            Duration::hours(config.auth.session_ttl_hours),
        )?;
        let notifier = NotificationDispatcher::new(sender, config.email.from_name.clone());
        let admin_address = config.email.admin_address.clone();
        let public_url = config.server.public_url.clone();

        let tracker = Arc::new(TranslationTracker::new(
            repos.translations.clone(),
            repos.posts.clone(),
        ));
        let translation_pipeline = Arc::new(TranslationPipeline::new(
            tracker,
            repos.posts.clone(),
            generator.clone(),
            notifier.clone(),
            admin_address.clone(),
        ));

        Ok(Self {
            tokens: Arc::new(tokens),
            admin: Arc::new(AdminCredentials {
                username: config.auth.admin_username.clone(),
                password_hash: config.auth.admin_password_hash.clone(),
            }),
            rate_limiter: Arc::new(LoginRateLimiter::new()),
            post_service: Arc::new(PostService::new(
                repos.posts.clone(),
                notifier.clone(),
                admin_address,
                public_url.clone(),
            )),
            translation_pipeline,
            subscriber_service: Arc::new(SubscriberService::new(
                repos.subscribers.clone(),
                notifier,
                public_url.clone(),
            )),
            landing_page_service: Arc::new(LandingPageService::new(
                repos.landing_pages.clone(),
                generator,
                public_url,
            )),
            analytics_service: Arc::new(AnalyticsService::new(
                repos.posts,
                repos.subscribers,
                repos.translations,
                repos.landing_pages,
            )),
            request_stats: Arc::new(RequestStats::new()),
        })
    }

    pub fn tracker(&self) -> &TranslationTracker {
        self.translation_pipeline.tracker()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(code: impl Into<String>, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::with_details(
            "RATE_LIMIT",
            message,
            serde_json::json!({ "retry_after": retry_after_secs }),
        )
    }

    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::new("UPSTREAM_ERROR", message)
    }

    /// Logs the cause; clients only see a generic message.
    pub fn internal_error(cause: impl std::fmt::Display) -> Self {
        tracing::error!("Internal error: {:#}", cause);
        Self::new("INTERNAL_ERROR", "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMIT" => StatusCode::TOO_MANY_REQUESTS,
            "UPSTREAM_ERROR" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::with_details(
            "UNAUTHORIZED",
            e.to_string(),
            serde_json::json!({ "reason": e.reason() }),
        )
    }
}

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        match e {
            TrackerError::AlreadyPending { .. } | TrackerError::NotPending(_) => ApiError::conflict(e.to_string()),
            TrackerError::NotFound(msg) => ApiError::not_found(msg),
            TrackerError::Invalid(msg) => ApiError::validation_error(msg),
            TrackerError::Internal(e) => ApiError::internal_error(e),
        }
    }
}

impl From<PostServiceError> for ApiError {
    fn from(e: PostServiceError) -> Self {
        match e {
            PostServiceError::NotFound(msg) => ApiError::not_found(msg),
            PostServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            PostServiceError::DuplicateSlug { .. } => ApiError::conflict(e.to_string()),
            PostServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<SubscriberServiceError> for ApiError {
    fn from(e: SubscriberServiceError) -> Self {
        match e {
            SubscriberServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            SubscriberServiceError::AlreadySubscribed(_) => ApiError::conflict(e.to_string()),
            SubscriberServiceError::InvalidToken => ApiError::not_found(e.to_string()),
            SubscriberServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<LandingPageError> for ApiError {
    fn from(e: LandingPageError) -> Self {
        match e {
            LandingPageError::ValidationError(msg) => ApiError::validation_error(msg),
            LandingPageError::Upstream(cause) => {
                tracing::warn!("Landing page generation failed: {}", cause);
                ApiError::upstream_error(cause.to_string())
            }
            LandingPageError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

// ============================================================================
// Auth Gate
// ============================================================================

/// Admin identity placed in request extensions by the gate
#[derive(Debug, Clone)]
pub struct AuthenticatedAdmin(pub AdminIdentity);

impl<S> FromRequestParts<S> for AuthenticatedAdmin
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedAdmin>()
            .cloned()
            .ok_or_else(|| ApiError::from(AuthError::MissingCredential))
    }
}

/// Session token from `Authorization: Bearer`, else the session cookie
pub(crate) fn extract_session_token(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|s| s.split(';'))
        .find_map(|cookie| {
            cookie
                .trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
                .map(str::to_string)
        })
}

/// Auth gate for admin routes.
///
/// Runs before the handler: any credential failure answers 401 and the
/// handler, with every store operation behind it, never runs.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(request.headers());

    let identity = state.tokens.authorize(token.as_deref()).map_err(|e| {
        tracing::debug!(
            "Rejected {} {}: {}",
            request.method(),
            request.uri().path(),
            e.reason()
        );
        ApiError::from(e)
    })?;

    request.extensions_mut().insert(AuthenticatedAdmin(identity));
    Ok(next.run(request).await)
}

/// Request statistics middleware
pub async fn request_stats_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    state.request_stats.record(start.elapsed().as_micros() as u64);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_extract_token_from_bearer() {
        let h = headers(&[(header::AUTHORIZATION, "Bearer abc.def")]);
        assert_eq!(extract_session_token(&h).as_deref(), Some("abc.def"));
    }

    #[test]
    fn test_extract_token_from_cookie() {
        let h = headers(&[(header::COOKIE, "theme=dark; admin_session=abc.def; other=1")]);
        assert_eq!(extract_session_token(&h).as_deref(), Some("abc.def"));

        // A cookie whose name merely starts with the session name is ignored.
        let h = headers(&[(header::COOKIE, "admin_session_old=zzz")]);
        assert!(extract_session_token(&h).is_none());
    }

    #[test]
    fn test_bearer_takes_priority() {
        let h = headers(&[
            (header::AUTHORIZATION, "Bearer from-header"),
            (header::COOKIE, "admin_session=from-cookie"),
        ]);
        assert_eq!(extract_session_token(&h).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_non_bearer_authorization_falls_back_to_cookie() {
        let h = headers(&[(header::AUTHORIZATION, "Basic xyz")]);
        assert!(extract_session_token(&h).is_none());

        let h = headers(&[
            (header::AUTHORIZATION, "Basic xyz"),
            (header::COOKIE, "admin_session=c"),
        ]);
        assert_eq!(extract_session_token(&h).as_deref(), Some("c"));
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ApiError::from(AuthError::Expired).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::rate_limited("slow down", 60).status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::upstream_error("llm").status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::from(TrackerError::NotPending(1)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(TrackerError::NotFound("x".to_string())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(TrackerError::Invalid("x".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::internal_error("boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_auth_error_carries_reason() {
        let error = ApiError::from(AuthError::InvalidSignature);
        assert_eq!(error.error.code, "UNAUTHORIZED");
        assert_eq!(
            error.error.details,
            Some(serde_json::json!({ "reason": "invalid_signature" }))
        );
    }

    #[test]
    fn test_request_stats() {
        let stats = RequestStats::new();
        assert_eq!(stats.avg_response_time_us(), 0.0);
        stats.record(100);
        stats.record(300);
        assert_eq!(stats.total_requests(), 2);
        assert_eq!(stats.avg_response_time_us(), 200.0);
    }
}
