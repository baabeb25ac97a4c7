//! HTTP API integration tests
//!
//! Exercises the router end-to-end over a temp database: ingestion,
//! validation, configuration, cycle triggers, and the operator gate
//! listing.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use gatewise_common::events::EventBus;
use gatewise_gd::{build_router, AppState};
use helpers::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_app() -> (tempfile::TempDir, sqlx::SqlitePool, axum::Router) {
    let (dir, pool) = setup_test_db().await;
    let state = AppState::new(pool.clone(), EventBus::new(256));
    let app = build_router(state);
    (dir, pool, app)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json_body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(json_body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, _pool, app) = test_app().await;

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "gatewise-gd");
}

#[tokio::test]
async fn test_checkin_ingestion_stamps_quality_weight() {
    let (_dir, _pool, app) = test_app().await;

    let (status, session) = send(&app, "POST", "/sessions", Some(json!({"name": "Day 1"}))).await;
    assert_eq!(status, StatusCode::OK);
    let session_id = session["guid"].as_str().unwrap();

    // 80m accuracy lands in the worst band but is still stored
    let (status, body) = send(
        &app,
        "POST",
        "/checkins",
        Some(json!({
            "session_id": session_id,
            "wristband_id": uuid::Uuid::new_v4().to_string(),
            "category": "GENERAL",
            "lat": 47.6062,
            "lon": -122.3321,
            "accuracy_m": 80.0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["quality_weight"], 0.4);
    assert!(body["event_id"].is_string());
    assert!(body["gate_id"].is_null());
}

#[tokio::test]
async fn test_checkin_without_location_scores_zero() {
    let (_dir, _pool, app) = test_app().await;
    let (_, session) = send(&app, "POST", "/sessions", Some(json!({"name": "Day 1"}))).await;
    let session_id = session["guid"].as_str().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/checkins",
        Some(json!({
            "session_id": session_id,
            "wristband_id": uuid::Uuid::new_v4().to_string(),
            "category": "GENERAL",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["quality_weight"], 0.0);
}

/// A scanning station with a configured gate resolves location-less
/// scans immediately, keeping them eligible for binding learning
#[tokio::test]
async fn test_checkin_with_known_gate_and_no_location() {
    let (_dir, pool, app) = test_app().await;
    let (_, session) = send(&app, "POST", "/sessions", Some(json!({"name": "Day 1"}))).await;
    let session_id = session["guid"].as_str().unwrap().to_string();

    let (status, gate) = send(
        &app,
        "POST",
        &format!("/sessions/{}/gates", session_id),
        Some(json!({"name": "Staff Door", "lat": 47.6062, "lon": -122.3321})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let gate_id = gate["guid"].as_str().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/checkins",
        Some(json!({
            "session_id": session_id,
            "wristband_id": uuid::Uuid::new_v4().to_string(),
            "category": "STAFF",
            "gate_id": gate_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["quality_weight"], 0.0);
    assert_eq!(body["gate_id"], gate_id);

    let resolved: Option<String> =
        sqlx::query_scalar("SELECT gate_guid FROM checkin_events WHERE guid = ?")
            .bind(body["event_id"].as_str().unwrap())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(resolved.as_deref(), Some(gate_id));
}

#[tokio::test]
async fn test_checkin_unknown_session_is_404() {
    let (_dir, _pool, app) = test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/checkins",
        Some(json!({
            "session_id": uuid::Uuid::new_v4().to_string(),
            "wristband_id": uuid::Uuid::new_v4().to_string(),
            "category": "GENERAL",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_config_rejected_and_stored_config_unchanged() {
    let (_dir, _pool, app) = test_app().await;
    let (_, session) = send(&app, "POST", "/sessions", Some(json!({"name": "Day 1"}))).await;
    let session_id = session["guid"].as_str().unwrap().to_string();
    let config_uri = format!("/sessions/{}/config", session_id);

    // Defaults come back for an unconfigured session
    let (status, defaults) = send(&app, "GET", &config_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(defaults["hard_confidence"], 0.8);

    // soft >= hard violates the invariant
    let mut invalid = defaults.clone();
    invalid["soft_confidence"] = json!(0.85);
    let (status, body) = send(&app, "PUT", &config_uri, Some(invalid)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    // Stored config is untouched
    let (_, after) = send(&app, "GET", &config_uri, None).await;
    assert_eq!(after["soft_confidence"], 0.7);

    // A valid write round-trips
    let mut valid = defaults.clone();
    valid["min_gate_samples"] = json!(5);
    let (status, _) = send(&app, "PUT", &config_uri, Some(valid)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, after) = send(&app, "GET", &config_uri, None).await;
    assert_eq!(after["min_gate_samples"], 5);
}

/// End-to-end: ingest a scan cloud, trigger discovery and enforcement
/// over HTTP, then validate a mismatched category at the new gate
#[tokio::test]
async fn test_full_discovery_and_validation_flow() {
    let (_dir, pool, app) = test_app().await;
    let (_, session) = send(&app, "POST", "/sessions", Some(json!({"name": "Day 1"}))).await;
    let session_id = session["guid"].as_str().unwrap().to_string();

    // Lower the enforcement bar so the flow stays small
    let config_uri = format!("/sessions/{}/config", session_id);
    let (_, mut config) = send(&app, "GET", &config_uri, None).await;
    config["min_effective_samples"] = json!(10);
    let (status, _) = send(&app, "PUT", &config_uri, Some(config)).await;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..30 {
        let (status, _) = send(
            &app,
            "POST",
            "/checkins",
            Some(json!({
                "session_id": session_id,
                "wristband_id": uuid::Uuid::new_v4().to_string(),
                "category": "GENERAL",
                "lat": 47.6062,
                "lon": -122.3321,
                "accuracy_m": 8.0,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, outcome) = send(
        &app,
        "POST",
        &format!("/sessions/{}/cycles/discovery", session_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(outcome["status"], "completed");
    assert_eq!(outcome["summary"]["gates_created"], 1);

    let (status, outcome) = send(
        &app,
        "POST",
        &format!("/sessions/{}/cycles/enforcement", session_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(outcome["status"], "completed");

    // The gate listing shows the enforced binding
    let (status, gates) = send(&app, "GET", &format!("/sessions/{}/gates", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let gates = gates.as_array().unwrap();
    assert_eq!(gates.len(), 1);
    let gate_id = gates[0]["guid"].as_str().unwrap().to_string();
    assert_eq!(gates[0]["bindings"][0]["category"], "GENERAL");
    assert_eq!(gates[0]["bindings"][0]["status"], "enforced");

    // A VIP wristband at the GENERAL gate is flagged
    let (status, decision) = send(
        &app,
        "POST",
        "/validate",
        Some(json!({
            "session_id": session_id,
            "gate_id": gate_id,
            "category": "VIP",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision["decision"], "flag_mismatch");

    // And GENERAL is allowed with its confidence reported
    let (status, decision) = send(
        &app,
        "POST",
        "/validate",
        Some(json!({
            "session_id": session_id,
            "gate_id": gate_id,
            "category": "GENERAL",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision["decision"], "allow");
    assert!(decision["confidence"].as_f64().unwrap() >= 0.8);

    // Sanity: the event log still holds every scan
    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM checkin_events")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stored, 30);
}

#[tokio::test]
async fn test_session_deactivation_skips_cycles() {
    let (_dir, _pool, app) = test_app().await;
    let (_, session) = send(&app, "POST", "/sessions", Some(json!({"name": "Day 1"}))).await;
    let session_id = session["guid"].as_str().unwrap().to_string();

    let (status, updated) = send(
        &app,
        "PATCH",
        &format!("/sessions/{}", session_id),
        Some(json!({"status": "inactive"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "inactive");

    let (status, outcome) = send(
        &app,
        "POST",
        &format!("/sessions/{}/cycles/discovery", session_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(outcome["status"], "skipped");
}
