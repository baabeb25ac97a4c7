//! Validation boundary
//!
//! The synchronous decision consulted by the scanning application on
//! each check-in attempt. Read-only over current bindings; all learning
//! and clustering stays asynchronous relative to this path.

use axum::{extract::State, routing::post, Json, Router};
use gatewise_common::db::models::BindingStatus;
use gatewise_common::geo::GeoPoint;
use gatewise_common::ThresholdConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::services::{validate_checkin, ValidationDecision};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ValidationRequest {
    pub session_id: Uuid,
    pub gate_id: Uuid,
    pub category: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub decision: ValidationDecision,
    /// Current binding confidence for observability, when a binding exists
    pub confidence: Option<f64>,
    pub binding_status: Option<BindingStatus>,
}

/// POST /validate
pub async fn validate(
    State(state): State<AppState>,
    Json(request): Json<ValidationRequest>,
) -> ApiResult<Json<ValidationResponse>> {
    if request.category.trim().is_empty() {
        return Err(ApiError::BadRequest("category must not be empty".to_string()));
    }

    let session_guid = request.session_id.to_string();
    let config = ThresholdConfig::load(&state.db, &session_guid).await?;

    let location = match (request.lat, request.lon) {
        (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => {
            Some(GeoPoint::new(lat, lon))
        }
        _ => None,
    };

    let outcome = validate_checkin(
        &state.db,
        &session_guid,
        &request.gate_id.to_string(),
        request.category.trim(),
        location,
        &config,
    )
    .await?;

    Ok(Json(ValidationResponse {
        decision: outcome.decision,
        confidence: outcome.confidence,
        binding_status: outcome.binding_status,
    }))
}

/// Build validation routes
pub fn validation_routes() -> Router<AppState> {
    Router::new().route("/validate", post(validate))
}
