//! Scheduling trigger boundary
//!
//! Externally-driven discovery and enforcement cycle entry points,
//! callable on a timer or by the ingestion side on volume milestones.
//! Responds 202 with the cycle summary, or a skipped marker when a cycle
//! for the session is already in flight.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::workflow::CycleOutcome;
use crate::AppState;

/// POST /sessions/:session_id/cycles/discovery
pub async fn trigger_discovery(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let session_guid = session_id.to_string();
    super::sessions::require_session(&state.db, &session_guid).await?;

    let outcome = match state.cycle_runner.run_discovery_cycle(&session_guid).await {
        Ok(outcome) => outcome,
        Err(e) => {
            *state.last_error.write().await = Some(e.to_string());
            return Err(e.into());
        }
    };
    Ok((StatusCode::ACCEPTED, Json(outcome_json(outcome))))
}

/// POST /sessions/:session_id/cycles/enforcement
pub async fn trigger_enforcement(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let session_guid = session_id.to_string();
    super::sessions::require_session(&state.db, &session_guid).await?;

    let outcome = match state.cycle_runner.run_enforcement_cycle(&session_guid).await {
        Ok(outcome) => outcome,
        Err(e) => {
            *state.last_error.write().await = Some(e.to_string());
            return Err(e.into());
        }
    };
    Ok((StatusCode::ACCEPTED, Json(outcome_json(outcome))))
}

fn outcome_json<T: Serialize>(outcome: CycleOutcome<T>) -> serde_json::Value {
    match outcome {
        CycleOutcome::Completed(summary) => json!({
            "status": "completed",
            "summary": summary,
        }),
        CycleOutcome::SkippedBusy => json!({
            "status": "skipped",
            "reason": "cycle already in flight for this session",
        }),
        CycleOutcome::SkippedInactive => json!({
            "status": "skipped",
            "reason": "session is not active",
        }),
        CycleOutcome::Cancelled => json!({
            "status": "cancelled",
            "reason": "session was deactivated mid-cycle",
        }),
    }
}

/// Build cycle trigger routes
pub fn cycle_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/sessions/:session_id/cycles/discovery",
            post(trigger_discovery),
        )
        .route(
            "/sessions/:session_id/cycles/enforcement",
            post(trigger_enforcement),
        )
}
