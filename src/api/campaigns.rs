use crate::campaign::{
    AdmissionError, Campaign, CampaignStatus, CampaignStore, DeviceConflict, ExclusivityGuard,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

/// State for the campaign admission API.
#[derive(Clone)]
pub struct CampaignAppState {
    pub campaigns: Arc<dyn CampaignStore>,
    pub guard: Arc<ExclusivityGuard>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConflictReport {
    campaign_id: String,
    can_start: bool,
    conflicts: Vec<DeviceConflict>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct ConflictResponse {
    error: String,
    conflicts: Vec<DeviceConflict>,
    suggestion: &'static str,
}

pub fn create_campaign_router(state: CampaignAppState) -> Router {
    Router::new()
        .route("/api/campaigns", post(create_campaign))
        .route("/api/campaigns/:id/start", post(start_campaign))
        .route("/api/campaigns/:id/conflicts", get(get_conflicts))
        .with_state(Arc::new(state))
}

/// POST /api/campaigns
///
/// A campaign submitted as running goes through admission; any other status
/// is stored as given.
async fn create_campaign(
    State(state): State<Arc<CampaignAppState>>,
    Json(campaign): Json<Campaign>,
) -> Result<(StatusCode, Json<Campaign>), AppError> {
    if campaign.id.trim().is_empty() || campaign.name.trim().is_empty() {
        return Err(AppError::Validation("id and name are required".to_string()));
    }

    let created = if campaign.status == CampaignStatus::Running {
        state.guard.create_running(campaign).await?
    } else {
        if !state.campaigns.insert(&campaign).map_err(AppError::internal)? {
            return Err(AdmissionError::AlreadyExists(campaign.id).into());
        }
        campaign
    };
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /api/campaigns/:id/start
async fn start_campaign(
    State(state): State<Arc<CampaignAppState>>,
    Path(id): Path<String>,
) -> Result<Json<Campaign>, AppError> {
    let campaign = state.guard.start(&id).await?;
    Ok(Json(campaign))
}

/// GET /api/campaigns/:id/conflicts
///
/// Dry run of the admission check.
async fn get_conflicts(
    State(state): State<Arc<CampaignAppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConflictReport>, AppError> {
    let campaign = state
        .campaigns
        .get(&id)
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::NotFound(format!("campaign '{}' not found", id)))?;
    let conflicts = state
        .guard
        .conflicts_for(&campaign)
        .map_err(AppError::internal)?;

    Ok(Json(ConflictReport {
        campaign_id: campaign.id,
        can_start: conflicts.is_empty(),
        conflicts,
    }))
}

#[derive(Debug)]
enum AppError {
    NotFound(String),
    Validation(String),
    AlreadyExists(String),
    Conflict(Vec<DeviceConflict>),
    Internal(String),
}

impl AppError {
    fn internal(e: anyhow::Error) -> Self {
        error!(error = %e, "Campaign store failure");
        AppError::Internal("internal error".to_string())
    }
}

impl From<AdmissionError> for AppError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::NotFound(_) => AppError::NotFound(e.to_string()),
            AdmissionError::AlreadyExists(_) => AppError::AlreadyExists(e.to_string()),
            AdmissionError::InvalidTransition { .. } | AdmissionError::NoDevice => {
                AppError::Validation(e.to_string())
            }
            AdmissionError::Conflict(conflicts) => AppError::Conflict(conflicts),
            AdmissionError::Store(inner) => AppError::internal(inner),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Conflict(conflicts) => {
                let body = ConflictResponse {
                    error: "device already in use by a running campaign".to_string(),
                    conflicts,
                    suggestion: "save_as_draft",
                };
                return (StatusCode::CONFLICT, Json(body)).into_response();
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::AlreadyExists(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: error_message })).into_response()
    }
}
