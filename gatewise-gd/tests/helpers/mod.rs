//! Shared test helpers
//!
//! Every integration test runs against a fresh on-disk SQLite database in
//! a temp directory (WAL mode needs a real file, and the concurrency
//! tests need shared state across connections).

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use gatewise_common::db;
use gatewise_common::events::EventBus;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

pub async fn setup_test_db() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = db::init_database(&dir.path().join("gatewise.db"))
        .await
        .unwrap();
    (dir, pool)
}

pub fn test_bus() -> EventBus {
    EventBus::new(256)
}

pub async fn create_session(pool: &SqlitePool, name: &str) -> String {
    let guid = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO venue_sessions (guid, name, status, created_at) VALUES (?, ?, 'active', ?)",
    )
    .bind(&guid)
    .bind(name)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
    guid
}

/// Insert a scan event directly, stamping the quality weight the way the
/// ingestion boundary does. Returns the event's row id.
pub async fn insert_scan(
    pool: &SqlitePool,
    session_guid: &str,
    category: &str,
    lat: Option<f64>,
    lon: Option<f64>,
    accuracy_m: Option<f64>,
    gate_guid: Option<&str>,
) -> i64 {
    insert_scan_at(pool, session_guid, category, lat, lon, accuracy_m, gate_guid, Utc::now()).await
}

pub async fn insert_scan_at(
    pool: &SqlitePool,
    session_guid: &str,
    category: &str,
    lat: Option<f64>,
    lon: Option<f64>,
    accuracy_m: Option<f64>,
    gate_guid: Option<&str>,
    scanned_at: DateTime<Utc>,
) -> i64 {
    let weight = if lat.is_some() && lon.is_some() {
        gatewise_gd::services::quality_filter::quality_weight(Some(
            accuracy_m.unwrap_or(f64::MAX),
        ))
    } else {
        0.0
    };

    let result = sqlx::query(
        r#"
        INSERT INTO checkin_events (
            guid, session_guid, wristband_guid, category, scanned_at,
            latitude, longitude, accuracy_m, quality_weight, gate_guid,
            outcome, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'success', ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(session_guid)
    .bind(Uuid::new_v4().to_string())
    .bind(category)
    .bind(scanned_at)
    .bind(lat)
    .bind(lon)
    .bind(accuracy_m)
    .bind(weight)
    .bind(gate_guid)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();

    result.last_insert_rowid()
}

/// Insert a gate directly, bypassing the materializer
pub async fn insert_gate(
    pool: &SqlitePool,
    session_guid: &str,
    name: &str,
    lat: f64,
    lon: f64,
) -> String {
    let guid = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO gates (
            guid, session_guid, name, latitude, longitude, lat_bucket,
            lon_bucket, derivation, health_score, status,
            spatial_variance_m, sample_count, first_seen_at, last_seen_at,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 'clustered', 70.0, 'active', 2.0, 30, ?, ?, ?, ?)
        "#,
    )
    .bind(&guid)
    .bind(session_guid)
    .bind(name)
    .bind(lat)
    .bind(lon)
    .bind(gatewise_gd::services::materializer::location_bucket(lat))
    .bind(gatewise_gd::services::materializer::location_bucket(lon))
    .bind(now)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();
    guid
}

/// Insert a category binding directly with the given state
pub async fn insert_binding(
    pool: &SqlitePool,
    gate_guid: &str,
    category: &str,
    status: &str,
    sample_count: i64,
    confidence: f64,
) {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO category_bindings (
            gate_guid, category, sample_count, confidence, status,
            violation_count, demotion_count, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)
        "#,
    )
    .bind(gate_guid)
    .bind(category)
    .bind(sample_count)
    .bind(confidence)
    .bind(status)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .unwrap();
}

/// Degrees of latitude corresponding to the given meters (~111.2km/deg)
pub fn lat_step(meters: f64) -> f64 {
    meters / 111_195.0
}

pub async fn count_gates(pool: &SqlitePool, session_guid: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM gates WHERE session_guid = ?")
        .bind(session_guid)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn count_active_gates(pool: &SqlitePool, session_guid: &str) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM gates WHERE session_guid = ? AND status = 'active'",
    )
    .bind(session_guid)
    .fetch_one(pool)
    .await
    .unwrap()
}
