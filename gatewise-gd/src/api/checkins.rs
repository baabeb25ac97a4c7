//! Ingestion boundary
//!
//! Accepts check-in events from the ticket/wristband subsystem. Events
//! are stored append-only with their GPS quality weight stamped; when the
//! scan carries a usable location and a gate is already within orphan
//! range, the gate is resolved immediately. Ingestion also drives the
//! scan-count milestones that trigger background discovery.

use axum::{extract::State, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use gatewise_common::db::models::{CheckinOutcome, Gate};
use gatewise_common::events::GatewiseEvent;
use gatewise_common::geo::GeoPoint;
use gatewise_common::ThresholdConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::services::quality_filter;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckinRequest {
    pub session_id: Uuid,
    pub wristband_id: Uuid,
    pub category: String,
    /// Defaults to the server clock when omitted
    pub scanned_at: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub accuracy_m: Option<f64>,
    /// Gate already known to the scanning station, when it has one
    /// configured. Lets location-less scans still feed binding learning.
    pub gate_id: Option<Uuid>,
    /// Scan outcome as reported by the entry application
    pub outcome: Option<CheckinOutcome>,
}

#[derive(Debug, Serialize)]
pub struct CheckinResponse {
    pub event_id: Uuid,
    /// Gate resolved at ingestion time, if any
    pub gate_id: Option<Uuid>,
    pub quality_weight: f64,
}

/// POST /checkins
pub async fn ingest_checkin(
    State(state): State<AppState>,
    Json(request): Json<CheckinRequest>,
) -> ApiResult<Json<CheckinResponse>> {
    if request.category.trim().is_empty() {
        return Err(ApiError::BadRequest("category must not be empty".to_string()));
    }

    let session_guid = request.session_id.to_string();
    super::sessions::require_session(&state.db, &session_guid).await?;

    let location = match (request.lat, request.lon) {
        (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => {
            Some(GeoPoint::new(lat, lon))
        }
        _ => None,
    };

    // Missing location scores 0; a location without reported accuracy is
    // treated like the worst accuracy band rather than trusted blindly.
    let quality_weight = match (&location, request.accuracy_m) {
        (None, _) => 0.0,
        (Some(_), Some(acc)) => quality_filter::quality_weight(Some(acc)),
        (Some(_), None) => quality_filter::quality_weight(Some(f64::MAX)),
    };

    let config = ThresholdConfig::load(&state.db, &session_guid).await?;

    // Resolution order: a gate the scanning station already knows wins;
    // otherwise try the nearest active gate within orphan range.
    let gate_guid = match request.gate_id {
        Some(gate_id) => {
            let guid = gate_id.to_string();
            let known: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM gates \
                 WHERE guid = ? AND session_guid = ? AND status = 'active'",
            )
            .bind(&guid)
            .bind(&session_guid)
            .fetch_one(&state.db)
            .await
            .map_err(gatewise_common::Error::from)?;
            if known == 0 {
                return Err(ApiError::BadRequest(format!(
                    "Gate {} is not an active gate of this session",
                    guid
                )));
            }
            Some(guid)
        }
        None => match &location {
            Some(point) => {
                nearest_gate_within(&state.db, &session_guid, point, config.orphan_max_distance_m)
                    .await?
            }
            None => None,
        },
    };

    let event_guid = Uuid::new_v4();
    let scanned_at = request.scanned_at.unwrap_or_else(Utc::now);
    let outcome = request.outcome.unwrap_or(CheckinOutcome::Success);

    sqlx::query(
        r#"
        INSERT INTO checkin_events (
            guid, session_guid, wristband_guid, category, scanned_at,
            latitude, longitude, accuracy_m, quality_weight, gate_guid,
            outcome, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event_guid.to_string())
    .bind(&session_guid)
    .bind(request.wristband_id.to_string())
    .bind(request.category.trim())
    .bind(scanned_at)
    .bind(location.as_ref().map(|p| p.latitude))
    .bind(location.as_ref().map(|p| p.longitude))
    .bind(request.accuracy_m)
    .bind(quality_weight)
    .bind(&gate_guid)
    .bind(outcome)
    .bind(Utc::now())
    .execute(&state.db)
    .await
    .map_err(gatewise_common::Error::from)?;

    debug!(
        event = %event_guid,
        session = %session_guid,
        quality_weight,
        gate = ?gate_guid,
        "Check-in recorded"
    );
    state.event_bus.emit(GatewiseEvent::CheckinRecorded {
        event_guid: event_guid.to_string(),
        session_guid: session_guid.clone(),
        category: request.category.trim().to_string(),
        gate_guid: gate_guid.clone(),
        quality_weight,
        timestamp: Utc::now(),
    });

    // Milestone check runs off the request path
    let runner = state.cycle_runner.clone();
    let session_for_task = session_guid.clone();
    tokio::spawn(async move {
        runner.maybe_run_milestone_cycles(&session_for_task).await;
    });

    Ok(Json(CheckinResponse {
        event_id: event_guid,
        gate_id: gate_guid
            .as_deref()
            .and_then(|g| Uuid::parse_str(g).ok()),
        quality_weight,
    }))
}

async fn nearest_gate_within(
    db: &sqlx::SqlitePool,
    session_guid: &str,
    point: &GeoPoint,
    max_distance_m: f64,
) -> ApiResult<Option<String>> {
    let gates = sqlx::query_as::<_, Gate>(
        "SELECT * FROM gates WHERE session_guid = ? AND status = 'active'",
    )
    .bind(session_guid)
    .fetch_all(db)
    .await
    .map_err(gatewise_common::Error::from)?;

    Ok(gates
        .into_iter()
        .map(|g| {
            let d = point.distance_m(&GeoPoint::new(g.latitude, g.longitude));
            (g.guid, d)
        })
        .filter(|(_, d)| *d <= max_distance_m)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(guid, _)| guid))
}

/// Build ingestion routes
pub fn checkin_routes() -> Router<AppState> {
    Router::new().route("/checkins", post(ingest_checkin))
}
