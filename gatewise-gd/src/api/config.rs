//! Configuration boundary
//!
//! Read/write the per-session adaptive thresholds. Writes are validated
//! before persisting; an invalid payload is rejected with 400 and the
//! stored config is untouched. Sessions without a stored config read
//! back the defaults.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use gatewise_common::ThresholdConfig;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::AppState;

/// GET /sessions/:session_id/config
pub async fn get_config(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<ThresholdConfig>> {
    let session_guid = session_id.to_string();
    super::sessions::require_session(&state.db, &session_guid).await?;

    let config = ThresholdConfig::load(&state.db, &session_guid).await?;
    Ok(Json(config))
}

/// PUT /sessions/:session_id/config
pub async fn put_config(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(config): Json<ThresholdConfig>,
) -> ApiResult<Json<ThresholdConfig>> {
    let session_guid = session_id.to_string();
    super::sessions::require_session(&state.db, &session_guid).await?;

    config.store(&state.db, &session_guid).await?;
    info!(session = %session_guid, "Threshold config updated");

    Ok(Json(config))
}

/// Build configuration routes
pub fn config_routes() -> Router<AppState> {
    Router::new().route(
        "/sessions/:session_id/config",
        get(get_config).put(put_config),
    )
}
