//! shop-tagger server - embedded Shopify app for managing product tags.
//!
//! # Architecture
//!
//! - Axum web framework
//! - Askama template for the embedded app shell
//! - Shopify Admin API (REST for products and webhooks, GraphQL for tag,
//!   product type and collection lookups)
//! - `PostgreSQL` for installed shops, with access tokens encrypted at rest
//!
//! # Trust boundaries
//!
//! - Install, callback and app-load requests carry a Shopify HMAC over the
//!   query string ([`middleware::VerifiedShopQuery`])
//! - Webhooks carry an HMAC over the raw body ([`middleware::ShopifyWebhook`])
//! - Catalog API calls carry an App Bridge session token
//!   ([`middleware::SessionShop`])

#![cfg_attr(not(test), forbid(unsafe_code))]

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Router, routing::get};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod shopify;
pub mod state;

use state::AppState;

/// Directory served at `/static`, relative to the workspace root.
const STATIC_DIR: &str = "crates/server/static";

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(routes::routes())
        .nest_service("/static", ServeDir::new(STATIC_DIR))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the database is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, header};
    use chrono::Utc;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::auth::SessionClaims;
    use crate::auth::hmac::sign_query;
    use crate::config::AppConfig;
    use crate::middleware::{HMAC_HEADER, SHOP_DOMAIN_HEADER, TOPIC_HEADER};

    /// Router over a pool that never connects; every request exercised here
    /// is rejected before the database is touched.
    fn test_app() -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/shop_tagger_test")
            .unwrap();
        app(AppState::new(AppConfig::for_tests(), pool).unwrap())
    }

    fn signed_uri(path: &str, params: &[(&str, &str)]) -> String {
        let mut pairs: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let hmac = sign_query(&pairs, "hush").unwrap();
        pairs.push(("hmac".to_string(), hmac));

        let query = pairs
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{path}?{query}")
    }

    fn session_token(aud: &str) -> String {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            iss: "https://foo.myshopify.com/admin".to_string(),
            dest: "https://foo.myshopify.com".to_string(),
            aud: aud.to_string(),
            sub: "42".to_string(),
            exp: now + 60,
            nbf: now - 5,
            iat: Some(now - 5),
            jti: None,
            sid: None,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"hush"),
        )
        .unwrap()
    }

    async fn status_of(request: Request<Body>) -> StatusCode {
        test_app().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_health() {
        let response = test_app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_app_load_without_hmac_is_unauthorized() {
        let request = Request::get("/app?shop=foo.myshopify.com&timestamp=1337178173")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_app_load_with_tampered_query_is_unauthorized() {
        let uri = signed_uri(
            "/app",
            &[("shop", "foo.myshopify.com"), ("timestamp", "1337178173")],
        )
        .replace("foo.myshopify.com", "bar.myshopify.com");
        let request = Request::get(uri).body(Body::empty()).unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_app_load_signed_but_invalid_shop_is_bad_request() {
        let uri = signed_uri(
            "/app",
            &[("shop", "evil.example.com"), ("timestamp", "1337178173")],
        );
        let request = Request::get(uri).body(Body::empty()).unwrap();
        assert_eq!(status_of(request).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_callback_without_code_is_bad_request() {
        let uri = signed_uri(
            "/auth/callback",
            &[("shop", "foo.myshopify.com"), ("state", "abc")],
        );
        let request = Request::get(uri).body(Body::empty()).unwrap();
        assert_eq!(status_of(request).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_uninstall_with_bad_signature_is_unauthorized() {
        let request = Request::post("/uninstall")
            .header(HMAC_HEADER, "bm90IHRoZSByaWdodCBkaWdlc3Q=")
            .header(SHOP_DOMAIN_HEADER, "foo.myshopify.com")
            .header(TOPIC_HEADER, "app/uninstalled")
            .body(Body::from(r#"{"id":1}"#))
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_uninstall_without_signature_is_unauthorized() {
        let request = Request::post("/uninstall")
            .header(SHOP_DOMAIN_HEADER, "foo.myshopify.com")
            .body(Body::from(r#"{"id":1}"#))
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_catalog_without_session_token_is_unauthorized() {
        let request = Request::get("/shop/products").body(Body::empty()).unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_catalog_with_wrong_audience_is_unauthorized() {
        let request = Request::post("/shop/products/editTag")
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", session_token("another_app")),
            )
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"id":1,"tags":"sale"}"#))
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_credentials_with_invalid_shop_is_bad_request() {
        let request = Request::get("/credentials?shop=not-a-shop.example.com")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let request = Request::get("/nope").body(Body::empty()).unwrap();
        assert_eq!(status_of(request).await, StatusCode::NOT_FOUND);
    }
}
