// Integration tests for webhook body size enforcement

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::*;
use sendgate::auth::{compute_signature, SIGNATURE_HEADER};
use sendgate::config::RuntimeConfig;
use tower::ServiceExt;

fn signed(raw: Vec<u8>) -> Request<Body> {
    let signature = compute_signature(SECRET.as_bytes(), &raw);
    Request::builder()
        .method("POST")
        .uri("/api/webhooks/whatsapp")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(raw))
        .unwrap()
}

fn padded_event(len: usize) -> Vec<u8> {
    let mut raw = br#"{"event":"group.join","session":"sales","payload":{}}"#.to_vec();
    // Trailing whitespace is valid JSON
    raw.resize(len, b' ');
    raw
}

/// Body over the limit → 413, even with a valid signature.
#[tokio::test]
async fn test_oversized_body_returns_413() {
    let services = services();
    services.runtime_config.write().unwrap().body_size_limit_bytes = 64;

    let resp = services.router().oneshot(signed(padded_event(65))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

/// Size is checked before the signature: an oversized unsigned body is 413, not 401.
#[tokio::test]
async fn test_size_checked_before_signature() {
    let services = services();
    services.runtime_config.write().unwrap().body_size_limit_bytes = 64;

    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/whatsapp")
        .body(Body::from(vec![b'x'; 128]))
        .unwrap();
    let resp = services.router().oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(services.dispatcher.metrics().snapshot().rejected_signatures, 0);
}

/// Limit equal to body length is allowed.
#[tokio::test]
async fn test_body_at_exact_limit_is_allowed() {
    let services = services();
    services.runtime_config.write().unwrap().body_size_limit_bytes = 100;

    let resp = services.router().oneshot(signed(padded_event(100))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[test]
fn test_runtime_config_body_limit_default() {
    assert_eq!(RuntimeConfig::default().body_size_limit_bytes, 1_048_576);
}
