use crate::auth::extract_bearer_token;
use crate::config::{RuntimeConfig, SharedRuntimeConfig};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

/// State for the admin API.
#[derive(Clone)]
pub struct AdminAppState {
    pub runtime_config: SharedRuntimeConfig,
    /// Bearer token required by the admin API. None = admin API closed.
    pub admin_token: Option<String>,
}

/// Partial update body; absent fields are left unchanged.
#[derive(Deserialize)]
pub struct RuntimeConfigUpdate {
    pub rate_limit_enabled: Option<bool>,
    pub rate_limit_webhook_per_minute: Option<u64>,
    pub body_size_limit_bytes: Option<usize>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn create_admin_router(state: AdminAppState) -> Router {
    Router::new()
        .route("/api/admin/config", get(get_config).put(put_config))
        .with_state(Arc::new(state))
}

/// GET /api/admin/config
async fn get_config(State(state): State<Arc<AdminAppState>>, headers: HeaderMap) -> Response {
    if !is_admin(&headers, &state.admin_token) {
        return unauthorized();
    }
    let cfg: RuntimeConfig = state
        .runtime_config
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    Json(cfg).into_response()
}

/// PUT /api/admin/config
async fn put_config(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
    Json(update): Json<RuntimeConfigUpdate>,
) -> Response {
    if !is_admin(&headers, &state.admin_token) {
        return unauthorized();
    }

    if update.rate_limit_webhook_per_minute == Some(0) || update.body_size_limit_bytes == Some(0) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "limits must be greater than zero".to_string(),
            }),
        )
            .into_response();
    }

    let mut cfg = state
        .runtime_config
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(v) = update.rate_limit_enabled {
        cfg.rate_limit_enabled = v;
    }
    if let Some(v) = update.rate_limit_webhook_per_minute {
        cfg.rate_limit_webhook_per_minute = v;
    }
    if let Some(v) = update.body_size_limit_bytes {
        cfg.body_size_limit_bytes = v;
    }

    info!(
        rate_limit_enabled = cfg.rate_limit_enabled,
        rate_limit_webhook_per_minute = cfg.rate_limit_webhook_per_minute,
        body_size_limit_bytes = cfg.body_size_limit_bytes,
        "Runtime config updated"
    );
    Json(cfg.clone()).into_response()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "Unauthorized".to_string(),
        }),
    )
        .into_response()
}

/// True when the bearer token matches the configured admin token.
fn is_admin(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    match extract_bearer_token(headers) {
        Ok(token) => token.as_bytes().ct_eq(expected.as_bytes()).into(),
        Err(e) => {
            warn!(reason = %e, "Admin request without valid token");
            false
        }
    }
}
