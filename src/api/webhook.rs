use crate::auth::verify_webhook;
use crate::config::SharedRuntimeConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::event::metrics::MetricsSnapshot;
use crate::event::WebhookEnvelope;
use crate::rate_limit::WebhookRateLimiter;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Hard ceiling on buffered webhook bodies; the runtime limit applies below it.
const MAX_WEBHOOK_BODY_BYTES: usize = 16 * 1024 * 1024;

/// State for the provider webhook endpoint.
#[derive(Clone)]
pub struct WebhookAppState {
    pub dispatcher: Dispatcher,
    /// HMAC secret. None = signatures are not checked.
    pub webhook_secret: Option<String>,
    pub runtime_config: SharedRuntimeConfig,
    pub rate_limiter: Arc<WebhookRateLimiter>,
}

#[derive(Serialize)]
struct WebhookResponse {
    success: bool,
    outcome: DispatchOutcome,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn create_webhook_router(state: WebhookAppState) -> Router {
    Router::new()
        .route("/api/webhooks/whatsapp", post(receive_webhook))
        .route("/api/webhooks/metrics", get(get_metrics))
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES))
        .with_state(Arc::new(state))
}

/// POST /api/webhooks/whatsapp
///
/// Order: rate limit, body size, signature, envelope parse, dispatch.
async fn receive_webhook(
    State(state): State<Arc<WebhookAppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let cfg = state
        .runtime_config
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();

    if !state.rate_limiter.admit(&cfg) {
        return Err(AppError::RateLimited);
    }

    if body.len() > cfg.body_size_limit_bytes {
        return Err(AppError::PayloadTooLarge);
    }

    if let Err(e) = verify_webhook(state.webhook_secret.as_deref(), &headers, &body) {
        state.dispatcher.metrics().record_rejected_signature();
        warn!(reason = e.reason(), body_len = body.len(), "Rejected webhook request");
        return Err(AppError::Unauthorized(e.to_string()));
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid webhook body: {}", e)))?;
    envelope
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    debug!(event = %envelope.event, session = %envelope.session, "Webhook received");

    // Detached so a dropped connection cannot interrupt ledger writes
    let dispatcher = state.dispatcher.clone();
    let outcome = tokio::spawn(async move { dispatcher.dispatch(&envelope).await })
        .await
        .map_err(|e| {
            error!(error = %e, "Webhook dispatch task aborted");
            AppError::Internal("webhook processing failed".to_string())
        })?;

    Ok(Json(WebhookResponse {
        success: true,
        outcome,
    }))
}

/// GET /api/webhooks/metrics
async fn get_metrics(State(state): State<Arc<WebhookAppState>>) -> Json<MetricsSnapshot> {
    Json(state.dispatcher.metrics().snapshot())
}

/// Webhook endpoint errors
#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    PayloadTooLarge,
    RateLimited,
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::RateLimited => {
                let body = Json(ErrorResponse {
                    error: "rate limit exceeded".to_string(),
                });
                let mut resp = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                resp.headers_mut().insert(
                    axum::http::header::RETRY_AFTER,
                    axum::http::HeaderValue::from_static("60"),
                );
                return resp;
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::PayloadTooLarge => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: error_message })).into_response()
    }
}
