use crate::capacity::{CapacityCalculator, CapacityError, DailyQuota};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

/// State for the device API.
#[derive(Clone)]
pub struct DeviceAppState {
    pub calculator: Arc<CapacityCalculator>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn create_device_router(state: DeviceAppState) -> Router {
    Router::new()
        .route("/api/devices/:id/capacity", get(get_capacity))
        .with_state(Arc::new(state))
}

/// GET /api/devices/:id/capacity
async fn get_capacity(
    State(state): State<Arc<DeviceAppState>>,
    Path(id): Path<String>,
) -> Result<Json<DailyQuota>, AppError> {
    let quota = state.calculator.capacity(&id, Utc::now())?;
    Ok(Json(quota))
}

enum AppError {
    NotFound(String),
    Internal,
}

impl From<CapacityError> for AppError {
    fn from(e: CapacityError) -> Self {
        match e {
            CapacityError::NotFound(_) => AppError::NotFound(e.to_string()),
            CapacityError::Store(inner) => {
                error!(error = %inner, "Capacity lookup failed");
                AppError::Internal
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}
