//! Venue session boundary
//!
//! Minimal session lifecycle for operator tooling: create, list, and
//! activate/deactivate. Deactivation cancels any in-flight background
//! cycle for the session after its current unit of work.

use axum::{
    extract::{Path, State},
    routing::{patch, post},
    Json, Router,
};
use chrono::Utc;
use gatewise_common::db::models::{SessionStatus, VenueSession};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub status: SessionStatus,
}

/// POST /sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<Json<VenueSession>> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }

    let guid = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO venue_sessions (guid, name, status, created_at) VALUES (?, ?, 'active', ?)",
    )
    .bind(&guid)
    .bind(request.name.trim())
    .bind(Utc::now())
    .execute(&state.db)
    .await
    .map_err(gatewise_common::Error::from)?;

    info!(session = %guid, name = %request.name.trim(), "Venue session created");
    let session = require_session(&state.db, &guid).await?;
    Ok(Json(session))
}

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<Vec<VenueSession>>> {
    let sessions = sqlx::query_as::<_, VenueSession>(
        "SELECT * FROM venue_sessions ORDER BY created_at DESC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(gatewise_common::Error::from)?;

    Ok(Json(sessions))
}

/// PATCH /sessions/:session_id
pub async fn update_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<UpdateSessionRequest>,
) -> ApiResult<Json<VenueSession>> {
    let guid = session_id.to_string();
    require_session(&state.db, &guid).await?;

    sqlx::query("UPDATE venue_sessions SET status = ? WHERE guid = ?")
        .bind(request.status)
        .bind(&guid)
        .execute(&state.db)
        .await
        .map_err(gatewise_common::Error::from)?;

    if request.status == SessionStatus::Inactive {
        // In-flight cycles finish their current unit of work, then stop
        state.registry.cancel(&guid).await;
        info!(session = %guid, "Session deactivated, background cycles cancelled");
    }

    let session = require_session(&state.db, &guid).await?;
    Ok(Json(session))
}

/// Fetch a session or fail with 404
pub(crate) async fn require_session(db: &SqlitePool, guid: &str) -> ApiResult<VenueSession> {
    let session = sqlx::query_as::<_, VenueSession>("SELECT * FROM venue_sessions WHERE guid = ?")
        .bind(guid)
        .fetch_optional(db)
        .await
        .map_err(gatewise_common::Error::from)?;

    session.ok_or_else(|| ApiError::NotFound(format!("Venue session {}", guid)))
}

/// Build session routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/:session_id", patch(update_session))
}
