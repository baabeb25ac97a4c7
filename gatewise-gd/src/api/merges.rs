//! Merge review boundary
//!
//! Lists pending merge suggestions and records approve/reject decisions
//! with audit fields. Approval runs the atomic merge; stale approvals
//! (already-resolved suggestions, merged-away gates) surface as 409.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use gatewise_common::db::models::{MergeSuggestion, SuggestionStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::services::merge_executor;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<SuggestionStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub reviewed_by: String,
    pub reason: Option<String>,
}

/// GET /sessions/:session_id/merge-suggestions
pub async fn list_suggestions(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<MergeSuggestion>>> {
    let session_guid = session_id.to_string();
    super::sessions::require_session(&state.db, &session_guid).await?;

    let suggestions = match query.status {
        Some(status) => sqlx::query_as::<_, MergeSuggestion>(
            "SELECT * FROM merge_suggestions WHERE session_guid = ? AND status = ? \
             ORDER BY created_at DESC",
        )
        .bind(&session_guid)
        .bind(status)
        .fetch_all(&state.db)
        .await
        .map_err(gatewise_common::Error::from)?,
        None => sqlx::query_as::<_, MergeSuggestion>(
            "SELECT * FROM merge_suggestions WHERE session_guid = ? ORDER BY created_at DESC",
        )
        .bind(&session_guid)
        .fetch_all(&state.db)
        .await
        .map_err(gatewise_common::Error::from)?,
    };

    Ok(Json(suggestions))
}

/// POST /merge-suggestions/:suggestion_id/approve
pub async fn approve_suggestion(
    State(state): State<AppState>,
    Path(suggestion_id): Path<Uuid>,
    Json(request): Json<ReviewRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    merge_executor::apply_merge(
        &state.db,
        &state.event_bus,
        &suggestion_id.to_string(),
        Some(&request.reviewed_by),
        request.reason.as_deref(),
        false,
    )
    .await?;

    Ok(Json(serde_json::json!({ "status": "approved" })))
}

/// POST /merge-suggestions/:suggestion_id/reject
pub async fn reject_suggestion(
    State(state): State<AppState>,
    Path(suggestion_id): Path<Uuid>,
    Json(request): Json<ReviewRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    merge_executor::reject_suggestion(
        &state.db,
        &suggestion_id.to_string(),
        Some(&request.reviewed_by),
        request.reason.as_deref(),
    )
    .await?;

    Ok(Json(serde_json::json!({ "status": "rejected" })))
}

/// Build merge review routes
pub fn merge_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/sessions/:session_id/merge-suggestions",
            get(list_suggestions),
        )
        .route(
            "/merge-suggestions/:suggestion_id/approve",
            post(approve_suggestion),
        )
        .route(
            "/merge-suggestions/:suggestion_id/reject",
            post(reject_suggestion),
        )
}
