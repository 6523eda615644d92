// Integration tests for GET/PUT /api/admin/config

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use sendgate::api::{create_admin_router, AdminAppState};
use sendgate::config::{RuntimeConfig, SharedRuntimeConfig};
use std::sync::{Arc, RwLock};
use tower::ServiceExt;

fn shared_defaults() -> SharedRuntimeConfig {
    Arc::new(RwLock::new(RuntimeConfig::default()))
}

fn create_test_app(runtime_config: SharedRuntimeConfig, admin_token: Option<&str>) -> Router {
    create_admin_router(AdminAppState {
        runtime_config,
        admin_token: admin_token.map(|t| t.to_string()),
    })
}

fn request(method: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri("/api/admin/config")
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let body = body
        .map(|b| Body::from(serde_json::to_vec(&b).unwrap()))
        .unwrap_or_else(Body::empty);
    builder.body(body).unwrap()
}

async fn json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// GET returns the current values.
#[tokio::test]
async fn test_get_config_returns_defaults() {
    let app = create_test_app(shared_defaults(), Some("secret"));

    let response = app.oneshot(request("GET", Some("secret"), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cfg = json(response).await;
    let defaults = RuntimeConfig::default();
    assert_eq!(cfg["rate_limit_enabled"], defaults.rate_limit_enabled);
    assert_eq!(
        cfg["rate_limit_webhook_per_minute"],
        defaults.rate_limit_webhook_per_minute
    );
    assert_eq!(cfg["body_size_limit_bytes"], defaults.body_size_limit_bytes);
}

/// PUT changes every field and the shared config reflects it.
#[tokio::test]
async fn test_put_config_updates_fields() {
    let shared = shared_defaults();
    let app = create_test_app(shared.clone(), Some("secret"));

    let update = serde_json::json!({
        "rate_limit_enabled": false,
        "rate_limit_webhook_per_minute": 1200,
        "body_size_limit_bytes": 65536
    });
    let response = app
        .oneshot(request("PUT", Some("secret"), Some(update)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cfg = shared.read().unwrap();
    assert!(!cfg.rate_limit_enabled);
    assert_eq!(cfg.rate_limit_webhook_per_minute, 1200);
    assert_eq!(cfg.body_size_limit_bytes, 65536);
}

/// Absent fields keep their values.
#[tokio::test]
async fn test_put_config_partial_update() {
    let shared = shared_defaults();
    let app = create_test_app(shared.clone(), Some("secret"));

    let response = app
        .oneshot(request(
            "PUT",
            Some("secret"),
            Some(serde_json::json!({"rate_limit_webhook_per_minute": 10})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    assert_eq!(body["rate_limit_webhook_per_minute"], 10);
    assert_eq!(body["rate_limit_enabled"], true);
    assert_eq!(body["body_size_limit_bytes"], 1_048_576);
}

#[tokio::test]
async fn test_put_config_wrong_token_returns_401() {
    let shared = shared_defaults();
    let app = create_test_app(shared.clone(), Some("secret"));

    let response = app
        .oneshot(request(
            "PUT",
            Some("nope"),
            Some(serde_json::json!({"rate_limit_enabled": false})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(shared.read().unwrap().rate_limit_enabled);
}

#[tokio::test]
async fn test_missing_token_returns_401() {
    let app = create_test_app(shared_defaults(), Some("secret"));
    let response = app.oneshot(request("GET", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Without a configured admin token the admin API is closed.
#[tokio::test]
async fn test_no_admin_token_closes_api() {
    let app = create_test_app(shared_defaults(), None);
    let response = app
        .oneshot(request("GET", Some("anything"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_put_zero_limit_rejected() {
    let shared = shared_defaults();
    let app = create_test_app(shared.clone(), Some("secret"));

    let response = app
        .oneshot(request(
            "PUT",
            Some("secret"),
            Some(serde_json::json!({"body_size_limit_bytes": 0})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(shared.read().unwrap().body_size_limit_bytes, 1_048_576);
}
