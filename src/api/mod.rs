//! API layer - HTTP handlers and routing
//!
//! Everything is served under `/api/v1`:
//! - Admin auth (login, logout, me)
//! - Admin post, translation, newsletter, landing page and analytics routes
//! - Public post, newsletter and landing page routes
//!
//! Admin routes sit behind the `require_admin` gate.

pub mod analytics;
pub mod auth;
pub mod common;
pub mod landing;
pub mod middleware;
pub mod newsletter;
pub mod posts;
pub mod translations;

use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, RequestStats};

/// Build the `/api/v1` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    let gated = Router::new()
        .merge(auth::protected_router())
        .merge(newsletter::admin_router())
        .nest("/posts", posts::admin_router().merge(translations::post_router()))
        .nest("/translations", translations::record_router())
        .nest("/landing-pages", landing::admin_router())
        .nest("/analytics", analytics::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_admin,
        ));

    Router::new()
        // Login and logout stay outside the gate
        .nest("/admin", gated.merge(auth::public_router()))
        .nest("/posts", posts::public_router())
        .nest("/newsletter", newsletter::public_router())
        .nest("/landing", landing::public_router())
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> anyhow::Result<Router> {
    // Credentials are allowed so the session cookie works cross-origin
    let origin = cors_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("Invalid CORS origin: {}", cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .allow_credentials(true);

    Ok(Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Outermost, so every request is counted
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::repositories::{
        LandingPageRepository, PostRepository, Repositories, SubscriberRepository,
        TranslationRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{
        CreatePostInput, LandingPage, NewLandingPage, Post, Subscriber, SubscriberStats,
        TranslationRecord, UpdatePostInput,
    };
    use crate::services::hash_password;
    use crate::services::notification::testing::RecordingSender;
    use crate::services::text_generation::testing::EchoGenerator;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{DateTime, Duration, Utc};
    use data_encoding::BASE64URL_NOPAD;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";
    const PASSWORD: &str = "correct horse battery";

    /// Store that counts every call and fails all of them
    #[derive(Default)]
    struct SpyStore {
        calls: AtomicUsize,
    }

    impl SpyStore {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn touch<T>(&self) -> anyhow::Result<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("spy store"))
        }
    }

    #[async_trait]
    impl PostRepository for SpyStore {
        async fn create(&self, _: &str, _: &CreatePostInput, _: &str) -> anyhow::Result<Post> {
            self.touch()
        }
        async fn get_by_id(&self, _: i64) -> anyhow::Result<Option<Post>> {
            self.touch()
        }
        async fn get_by_locale_slug(&self, _: &str, _: &str) -> anyhow::Result<Option<Post>> {
            self.touch()
        }
        async fn list(&self, _: i64, _: i64) -> anyhow::Result<Vec<Post>> {
            self.touch()
        }
        async fn count(&self) -> anyhow::Result<i64> {
            self.touch()
        }
        async fn list_published(&self, _: Option<&str>, _: i64, _: i64) -> anyhow::Result<Vec<Post>> {
            self.touch()
        }
        async fn count_published(&self, _: Option<&str>) -> anyhow::Result<i64> {
            self.touch()
        }
        async fn update(&self, _: i64, _: &UpdatePostInput, _: Option<&str>) -> anyhow::Result<Post> {
            self.touch()
        }
        async fn exists_by_locale_slug(&self, _: &str, _: &str) -> anyhow::Result<bool> {
            self.touch()
        }
        async fn count_by_status(&self) -> anyhow::Result<Vec<(String, i64)>> {
            self.touch()
        }
        async fn count_by_locale(&self) -> anyhow::Result<Vec<(String, i64)>> {
            self.touch()
        }
    }

    #[async_trait]
    impl TranslationRepository for SpyStore {
        async fn create_pending(
            &self,
            _: i64,
            _: &str,
            _: DateTime<Utc>,
        ) -> anyhow::Result<Option<TranslationRecord>> {
            self.touch()
        }
        async fn get_by_id(&self, _: i64) -> anyhow::Result<Option<TranslationRecord>> {
            self.touch()
        }
        async fn mark_completed(&self, _: i64, _: i64, _: DateTime<Utc>) -> anyhow::Result<bool> {
            self.touch()
        }
        async fn mark_failed(&self, _: i64, _: &str, _: DateTime<Utc>) -> anyhow::Result<bool> {
            self.touch()
        }
        async fn list_by_post(&self, _: i64) -> anyhow::Result<Vec<TranslationRecord>> {
            self.touch()
        }
        async fn list_by_post_locale(&self, _: i64, _: &str) -> anyhow::Result<Vec<TranslationRecord>> {
            self.touch()
        }
        async fn fail_pending_before(&self, _: DateTime<Utc>, _: &str, _: DateTime<Utc>) -> anyhow::Result<u64> {
            self.touch()
        }
        async fn count_by_status(&self) -> anyhow::Result<Vec<(String, i64)>> {
            self.touch()
        }
    }

    #[async_trait]
    impl SubscriberRepository for SpyStore {
        async fn create(&self, _: &str, _: &str, _: DateTime<Utc>) -> anyhow::Result<Subscriber> {
            self.touch()
        }
        async fn get_by_email(&self, _: &str) -> anyhow::Result<Option<Subscriber>> {
            self.touch()
        }
        async fn get_by_token(&self, _: &str) -> anyhow::Result<Option<Subscriber>> {
            self.touch()
        }
        async fn reactivate(&self, _: i64, _: &str, _: DateTime<Utc>) -> anyhow::Result<()> {
            self.touch()
        }
        async fn mark_verified(&self, _: i64, _: DateTime<Utc>) -> anyhow::Result<()> {
            self.touch()
        }
        async fn mark_unsubscribed(&self, _: i64, _: DateTime<Utc>) -> anyhow::Result<()> {
            self.touch()
        }
        async fn list(&self, _: i64, _: i64) -> anyhow::Result<Vec<Subscriber>> {
            self.touch()
        }
        async fn count(&self) -> anyhow::Result<i64> {
            self.touch()
        }
        async fn list_recipients(&self) -> anyhow::Result<Vec<Subscriber>> {
            self.touch()
        }
        async fn stats(&self) -> anyhow::Result<SubscriberStats> {
            self.touch()
        }
    }

    #[async_trait]
    impl LandingPageRepository for SpyStore {
        async fn create(&self, _: &NewLandingPage) -> anyhow::Result<LandingPage> {
            self.touch()
        }
        async fn get_by_slug(&self, _: &str) -> anyhow::Result<Option<LandingPage>> {
            self.touch()
        }
        async fn exists_by_slug(&self, _: &str) -> anyhow::Result<bool> {
            self.touch()
        }
        async fn list(&self, _: Option<&str>, _: i64) -> anyhow::Result<Vec<LandingPage>> {
            self.touch()
        }
        async fn count(&self) -> anyhow::Result<i64> {
            self.touch()
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.auth.signing_secret = SECRET.to_string();
        config.auth.admin_password_hash = hash_password(PASSWORD).unwrap();
        config
    }

    fn app(repos: Repositories) -> (Router, AppState) {
        let state = AppState::new(
            &test_config(),
            repos,
            Arc::new(EchoGenerator::new("tr:")),
            Arc::new(RecordingSender::default()),
        )
        .unwrap();
        let router = build_router(state.clone(), "http://localhost:3000").unwrap();
        (router, state)
    }

    fn spy_app() -> (Router, AppState, Arc<SpyStore>) {
        let spy = Arc::new(SpyStore::default());
        let repos = Repositories {
            posts: spy.clone(),
            translations: spy.clone(),
            subscribers: spy.clone(),
            landing_pages: spy.clone(),
        };
        let (router, state) = app(repos);
        (router, state, spy)
    }

    async fn db_app() -> (Router, AppState) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        app(Repositories::sqlx(pool))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn assert_rejected(router: Router, request: Request<Body>, reason: &str) {
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
        assert_eq!(body["error"]["details"]["reason"], reason);
    }

    #[tokio::test]
    async fn test_gate_rejects_before_any_store_access() {
        let (router, state, spy) = spy_app();

        let expired = state
            .tokens
            .issue_at("admin", Utc::now() - Duration::hours(25))
            .unwrap()
            .token;

        let valid = state.tokens.issue("admin").unwrap().token;
        let (_, signature) = valid.split_once('.').unwrap();
        let forged_claims = BASE64URL_NOPAD.encode(br#"{"sub":"admin","iat":0,"exp":99999999999}"#);
        let tampered = format!("{}.{}", forged_claims, signature);

        let body = serde_json::json!({ "target_locale": "en" });
        let cases = [
            (post_json("/api/v1/admin/posts/1/translations", None, body.clone()), "missing_credential"),
            (post_json("/api/v1/admin/posts/1/translations", Some(&expired), body.clone()), "expired"),
            (post_json("/api/v1/admin/posts/1/translations", Some(&tampered), body.clone()), "invalid_signature"),
            (post_json("/api/v1/admin/posts/1/translations", Some("garbage"), body), "malformed"),
            (get("/api/v1/admin/posts", Some(&expired)), "expired"),
            (get("/api/v1/admin/analytics", Some(&tampered)), "invalid_signature"),
            (get("/api/v1/admin/subscribers", None), "missing_credential"),
            (get("/api/v1/admin/me", Some(&expired)), "expired"),
        ];

        for (request, reason) in cases {
            assert_rejected(router.clone(), request, reason).await;
        }
        assert_eq!(spy.calls(), 0);
    }

    #[tokio::test]
    async fn test_gate_accepts_session_cookie() {
        let (router, state, spy) = spy_app();
        let token = state.tokens.issue("admin").unwrap().token;

        let request = Request::builder()
            .uri("/api/v1/admin/posts/7")
            .header(header::COOKIE, format!("admin_session={}", token))
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        // The handler ran and hit the (failing) store.
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(spy.calls() > 0);
    }

    #[tokio::test]
    async fn test_login_sets_cookie_and_token_works() {
        let (router, _) = db_app().await;

        let response = router
            .clone()
            .oneshot(post_json(
                "/api/v1/admin/login",
                None,
                serde_json::json!({ "username": "admin", "password": PASSWORD }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("admin_session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=86400"));

        let body = json_body(response).await;
        let token = body["token"].as_str().unwrap().to_string();
        assert_eq!(body["admin"]["username"], "admin");

        let me = router.oneshot(get("/api/v1/admin/me", Some(&token))).await.unwrap();
        assert_eq!(me.status(), StatusCode::OK);
        assert_eq!(json_body(me).await["username"], "admin");
    }

    #[tokio::test]
    async fn test_login_rejects_wrong_password_then_rate_limits() {
        let (router, _) = db_app().await;
        let attempt = || {
            post_json(
                "/api/v1/admin/login",
                None,
                serde_json::json!({ "username": "admin", "password": "nope" }),
            )
        };

        for _ in 0..5 {
            let response = router.clone().oneshot(attempt()).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let response = router.oneshot(attempt()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "RATE_LIMIT");
        assert_eq!(body["error"]["details"]["retry_after"], 900);
    }

    #[tokio::test]
    async fn test_logout_clears_cookie() {
        let (router, _, _) = spy_app();
        let response = router
            .oneshot(post_json("/api/v1/admin/logout", None, serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers().get(header::SET_COOKIE).unwrap();
        assert!(cookie.to_str().unwrap().contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_post_publish_and_translation_flow() {
        let (router, state) = db_app().await;
        let token = state.tokens.issue("admin").unwrap().token;

        let response = router
            .clone()
            .oneshot(post_json(
                "/api/v1/admin/posts",
                Some(&token),
                serde_json::json!({
                    "locale": "zh",
                    "title": "Hello World",
                    "body": "# Hi",
                    "status": "published"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let post = json_body(response).await;
        let post_id = post["id"].as_i64().unwrap();
        assert_eq!(post["slug"], "hello-world");

        let public = router
            .clone()
            .oneshot(get("/api/v1/posts/zh/hello-world", None))
            .await
            .unwrap();
        assert_eq!(public.status(), StatusCode::OK);

        let duplicate = router
            .clone()
            .oneshot(post_json(
                "/api/v1/admin/posts",
                Some(&token),
                serde_json::json!({ "locale": "zh", "title": "Hello World", "body": "again" }),
            ))
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let requested = router
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/admin/posts/{}/translations", post_id),
                Some(&token),
                serde_json::json!({ "target_locale": "en" }),
            ))
            .await
            .unwrap();
        assert_eq!(requested.status(), StatusCode::ACCEPTED);
        let record = json_body(requested).await;
        assert_eq!(record["status"], "pending");
        let record_id = record["id"].as_i64().unwrap();

        let fetched = router
            .clone()
            .oneshot(get(&format!("/api/v1/admin/translations/{}", record_id), Some(&token)))
            .await
            .unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);

        let same_locale = router
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/admin/posts/{}/translations", post_id),
                Some(&token),
                serde_json::json!({ "target_locale": "zh" }),
            ))
            .await
            .unwrap();
        assert_eq!(same_locale.status(), StatusCode::BAD_REQUEST);

        let missing = router
            .oneshot(post_json(
                "/api/v1/admin/posts/9999/translations",
                Some(&token),
                serde_json::json!({ "target_locale": "en" }),
            ))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_manual_transition_conflict() {
        let (router, state) = db_app().await;
        let token = state.tokens.issue("admin").unwrap().token;

        let source = state
            .post_service
            .create(CreatePostInput::new("en", "Source", "body"))
            .await
            .unwrap();
        let record = state.tracker().request_translation(source.id, "fr").await.unwrap();

        let fail_uri = format!("/api/v1/admin/translations/{}/fail", record.id);
        let first = router
            .clone()
            .oneshot(post_json(&fail_uri, Some(&token), serde_json::json!({ "reason": "manual" })))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(json_body(first).await["status"], "failed");

        let second = router
            .oneshot(post_json(&fail_uri, Some(&token), serde_json::json!({ "reason": "again" })))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_newsletter_subscribe_and_verify() {
        let (router, state) = db_app().await;

        let response = router
            .clone()
            .oneshot(post_json(
                "/api/v1/newsletter/subscribe",
                None,
                serde_json::json!({ "email": "Reader@Example.com" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await["email"], "reader@example.com");

        let again = router
            .clone()
            .oneshot(post_json(
                "/api/v1/newsletter/subscribe",
                None,
                serde_json::json!({ "email": "reader@example.com" }),
            ))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::CONFLICT);

        let bad = router
            .oneshot(get("/api/v1/newsletter/verify?token=not-a-token", None))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::NOT_FOUND);

        let stats = state.analytics_service.report().await.unwrap();
        assert_eq!(stats.subscribers.total, 1);
    }

    #[tokio::test]
    async fn test_analytics_includes_request_stats() {
        let (router, state) = db_app().await;
        let token = state.tokens.issue("admin").unwrap().token;

        let response = router
            .oneshot(get("/api/v1/admin/analytics", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["posts"]["total"], 0);
        assert_eq!(body["translations"]["pending"], 0);
        assert!(body["requests"]["total_requests"].is_u64());
    }

    #[test]
    fn test_invalid_cors_origin_is_an_error() {
        let state = AppState::new(
            &test_config(),
            Repositories {
                posts: Arc::new(SpyStore::default()),
                translations: Arc::new(SpyStore::default()),
                subscribers: Arc::new(SpyStore::default()),
                landing_pages: Arc::new(SpyStore::default()),
            },
            Arc::new(EchoGenerator::new("")),
            Arc::new(RecordingSender::default()),
        )
        .unwrap();
        assert!(build_router(state, "bad\norigin").is_err());
    }
}
