//! Gate query and operator boundary
//!
//! Lists a session's gates with health and current category bindings,
//! and accepts operator overrides: manual gate creation, rename/status
//! changes, unbound-binding resets, and manual merge requests.

use axum::{
    extract::{Path, State},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use gatewise_common::db::models::{CategoryBinding, Gate, GateStatus};
use gatewise_common::geo::GeoPoint;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::services::materializer::{health_score, location_bucket};
use crate::services::merge_executor;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct GateWithBindings {
    #[serde(flatten)]
    pub gate: Gate,
    pub bindings: Vec<CategoryBinding>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGateRequest {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGateRequest {
    pub name: Option<String>,
    pub status: Option<GateStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ManualMergeRequest {
    pub source_gate_id: Uuid,
    pub target_gate_id: Uuid,
    pub requested_by: String,
    pub reason: Option<String>,
}

/// GET /sessions/:session_id/gates
pub async fn list_gates(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Vec<GateWithBindings>>> {
    let session_guid = session_id.to_string();
    super::sessions::require_session(&state.db, &session_guid).await?;

    let gates = sqlx::query_as::<_, Gate>(
        "SELECT * FROM gates WHERE session_guid = ? ORDER BY created_at",
    )
    .bind(&session_guid)
    .fetch_all(&state.db)
    .await
    .map_err(gatewise_common::Error::from)?;

    let mut result = Vec::with_capacity(gates.len());
    for gate in gates {
        let bindings = sqlx::query_as::<_, CategoryBinding>(
            "SELECT * FROM category_bindings WHERE gate_guid = ? ORDER BY confidence DESC",
        )
        .bind(&gate.guid)
        .fetch_all(&state.db)
        .await
        .map_err(gatewise_common::Error::from)?;

        result.push(GateWithBindings { gate, bindings });
    }

    Ok(Json(result))
}

/// POST /sessions/:session_id/gates (manual gate creation)
pub async fn create_gate(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<CreateGateRequest>,
) -> ApiResult<Json<Gate>> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }
    if !request.lat.is_finite() || !request.lon.is_finite() {
        return Err(ApiError::BadRequest("lat/lon must be finite".to_string()));
    }

    let session_guid = session_id.to_string();
    super::sessions::require_session(&state.db, &session_guid).await?;

    let guid = Uuid::new_v4().to_string();
    let now = Utc::now();
    let score = health_score(
        0,
        true,
        None,
        None,
        gatewise_common::db::models::GateDerivation::Manual,
        1,
    );

    let result = sqlx::query(
        r#"
        INSERT INTO gates (
            guid, session_guid, name, latitude, longitude, lat_bucket,
            lon_bucket, derivation, health_score, status,
            spatial_variance_m, sample_count, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 'manual', ?, 'active', 0.0, 0, ?, ?)
        ON CONFLICT(session_guid, lat_bucket, lon_bucket) DO NOTHING
        "#,
    )
    .bind(&guid)
    .bind(&session_guid)
    .bind(request.name.trim())
    .bind(request.lat)
    .bind(request.lon)
    .bind(location_bucket(request.lat))
    .bind(location_bucket(request.lon))
    .bind(score)
    .bind(now)
    .bind(now)
    .execute(&state.db)
    .await
    .map_err(gatewise_common::Error::from)?;

    if result.rows_affected() == 0 {
        return Err(ApiError::Conflict(
            "A gate already exists at this location".to_string(),
        ));
    }

    info!(gate = %guid, session = %session_guid, "Manual gate created");
    let gate = fetch_gate(&state.db, &guid).await?;
    Ok(Json(gate))
}

/// PATCH /gates/:gate_id (rename or status override)
pub async fn update_gate(
    State(state): State<AppState>,
    Path(gate_id): Path<Uuid>,
    Json(request): Json<UpdateGateRequest>,
) -> ApiResult<Json<Gate>> {
    let guid = gate_id.to_string();
    let gate = fetch_gate(&state.db, &guid).await?;

    let name = match request.name {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        Some(_) => return Err(ApiError::BadRequest("name must not be empty".to_string())),
        None => gate.name,
    };
    let status = request.status.unwrap_or(gate.status);

    sqlx::query("UPDATE gates SET name = ?, status = ?, updated_at = ? WHERE guid = ?")
        .bind(&name)
        .bind(status)
        .bind(Utc::now())
        .bind(&guid)
        .execute(&state.db)
        .await
        .map_err(gatewise_common::Error::from)?;

    let gate = fetch_gate(&state.db, &guid).await?;
    Ok(Json(gate))
}

/// POST /gates/:gate_id/bindings/:category/reset
///
/// Operator reset for an unbound binding: back to probation with
/// violation history cleared. Enforcement must be re-earned through the
/// normal promotion path.
pub async fn reset_binding(
    State(state): State<AppState>,
    Path((gate_id, category)): Path<(Uuid, String)>,
) -> ApiResult<Json<CategoryBinding>> {
    let gate_guid = gate_id.to_string();
    fetch_gate(&state.db, &gate_guid).await?;

    let result = sqlx::query(
        "UPDATE category_bindings SET status = 'probation', violation_count = 0, \
         demotion_count = 0, updated_at = ? \
         WHERE gate_guid = ? AND category = ? AND status = 'unbound'",
    )
    .bind(Utc::now())
    .bind(&gate_guid)
    .bind(&category)
    .execute(&state.db)
    .await
    .map_err(gatewise_common::Error::from)?;

    if result.rows_affected() == 0 {
        return Err(ApiError::BadRequest(format!(
            "No unbound binding for category {} at this gate",
            category
        )));
    }

    info!(gate = %gate_guid, category = %category, "Unbound binding reset to probation");
    let binding = sqlx::query_as::<_, CategoryBinding>(
        "SELECT * FROM category_bindings WHERE gate_guid = ? AND category = ?",
    )
    .bind(&gate_guid)
    .bind(&category)
    .fetch_one(&state.db)
    .await
    .map_err(gatewise_common::Error::from)?;

    Ok(Json(binding))
}

/// POST /sessions/:session_id/gates/merge (operator-requested merge)
///
/// Creates an operator-confidence suggestion and applies it immediately
/// through the same atomic merge path the detector uses.
pub async fn manual_merge(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<ManualMergeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let session_guid = session_id.to_string();
    super::sessions::require_session(&state.db, &session_guid).await?;

    if request.source_gate_id == request.target_gate_id {
        return Err(ApiError::BadRequest(
            "source and target gates must differ".to_string(),
        ));
    }

    let source = fetch_gate(&state.db, &request.source_gate_id.to_string()).await?;
    let target = fetch_gate(&state.db, &request.target_gate_id.to_string()).await?;
    if source.session_guid != session_guid || target.session_guid != session_guid {
        return Err(ApiError::BadRequest(
            "both gates must belong to the session".to_string(),
        ));
    }

    let distance = GeoPoint::new(source.latitude, source.longitude)
        .distance_m(&GeoPoint::new(target.latitude, target.longitude));

    let suggestion_guid = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO merge_suggestions (
            guid, session_guid, source_gate_guid, target_gate_guid,
            distance_m, traffic_similarity, confidence, status, created_at
        ) VALUES (?, ?, ?, ?, ?, 1.0, 1.0, 'pending', ?)
        "#,
    )
    .bind(&suggestion_guid)
    .bind(&session_guid)
    .bind(&source.guid)
    .bind(&target.guid)
    .bind(distance)
    .bind(Utc::now())
    .execute(&state.db)
    .await
    .map_err(gatewise_common::Error::from)?;

    merge_executor::apply_merge(
        &state.db,
        &state.event_bus,
        &suggestion_guid,
        Some(&request.requested_by),
        request.reason.as_deref(),
        false,
    )
    .await?;

    Ok(Json(serde_json::json!({
        "suggestion_id": suggestion_guid,
        "merged_into": target.guid,
    })))
}

async fn fetch_gate(db: &SqlitePool, guid: &str) -> ApiResult<Gate> {
    let gate = sqlx::query_as::<_, Gate>("SELECT * FROM gates WHERE guid = ?")
        .bind(guid)
        .fetch_optional(db)
        .await
        .map_err(gatewise_common::Error::from)?;

    gate.ok_or_else(|| ApiError::NotFound(format!("Gate {}", guid)))
}

/// Build gate routes
pub fn gate_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/sessions/:session_id/gates",
            get(list_gates).post(create_gate),
        )
        .route("/sessions/:session_id/gates/merge", post(manual_merge))
        .route("/gates/:gate_id", patch(update_gate))
        .route(
            "/gates/:gate_id/bindings/:category/reset",
            post(reset_binding),
        )
}
