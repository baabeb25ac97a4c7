//! Database initialization
//!
//! Creates the connection pool and the full gatewise schema. Safe to call
//! on every startup: all DDL is `IF NOT EXISTS` and default settings are
//! only inserted when missing.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use sqlite options to create database if it doesn't exist.
    // Pool is sized for one synchronous validation path plus several
    // concurrent background cycles.
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL mode: concurrent readers with one writer. The validation path
    // reads while discovery/enforcement cycles write.
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Short busy timeout; contention beyond this is handled by the
    // retry-with-backoff wrapper in the service crate.
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;
    super::settings::init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_venue_sessions_table(pool).await?;
    create_checkin_events_table(pool).await?;
    create_gates_table(pool).await?;
    create_category_bindings_table(pool).await?;
    create_learned_events_table(pool).await?;
    create_merge_suggestions_table(pool).await?;
    create_threshold_config_table(pool).await?;
    create_cycle_checkpoints_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores service-level configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_venue_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS venue_sessions (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_checkin_events_table(pool: &SqlitePool) -> Result<()> {
    // Append-only. `id` provides the monotonic cursor that background
    // cycles checkpoint against; `gate_guid` is the only column ever
    // updated after insert (orphan backfill and merge re-pointing).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkin_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            session_guid TEXT NOT NULL,
            wristband_guid TEXT NOT NULL,
            category TEXT NOT NULL,
            scanned_at TIMESTAMP NOT NULL,
            latitude REAL,
            longitude REAL,
            accuracy_m REAL,
            quality_weight REAL NOT NULL DEFAULT 0.0,
            gate_guid TEXT,
            outcome TEXT NOT NULL DEFAULT 'success',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_checkin_events_session ON checkin_events(session_guid, id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_checkin_events_gate ON checkin_events(gate_guid)")
        .execute(pool)
        .await?;

    // Partial index keeps orphan backfill cheap as the event log grows
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_checkin_events_orphan \
         ON checkin_events(session_guid, id) WHERE gate_guid IS NULL",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_gates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gates (
            guid TEXT PRIMARY KEY,
            session_guid TEXT NOT NULL,
            name TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            lat_bucket INTEGER NOT NULL,
            lon_bucket INTEGER NOT NULL,
            derivation TEXT NOT NULL DEFAULT 'clustered',
            health_score REAL NOT NULL DEFAULT 50.0,
            status TEXT NOT NULL DEFAULT 'active',
            spatial_variance_m REAL NOT NULL DEFAULT 0.0,
            sample_count INTEGER NOT NULL DEFAULT 0,
            first_seen_at TIMESTAMP,
            last_seen_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // The materialization guarantee: at most one gate per rounded centroid
    // per session, regardless of how many reconcile runs race.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_gates_session_bucket \
         ON gates(session_guid, lat_bucket, lon_bucket)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_gates_session ON gates(session_guid, status)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_category_bindings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS category_bindings (
            gate_guid TEXT NOT NULL,
            category TEXT NOT NULL,
            sample_count INTEGER NOT NULL DEFAULT 0,
            confidence REAL NOT NULL DEFAULT 0.0,
            status TEXT NOT NULL DEFAULT 'probation',
            violation_count INTEGER NOT NULL DEFAULT 0,
            demotion_count INTEGER NOT NULL DEFAULT 0,
            last_violation_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (gate_guid, category)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_learned_events_table(pool: &SqlitePool) -> Result<()> {
    // Idempotency ledger: an event guid lands here exactly once, so
    // at-least-once delivery never double-counts a scan in the learner.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS learned_events (
            event_guid TEXT PRIMARY KEY,
            learned_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_merge_suggestions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merge_suggestions (
            guid TEXT PRIMARY KEY,
            session_guid TEXT NOT NULL,
            source_gate_guid TEXT NOT NULL,
            target_gate_guid TEXT NOT NULL,
            distance_m REAL NOT NULL,
            traffic_similarity REAL NOT NULL,
            confidence REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            reviewed_by TEXT,
            reviewed_at TIMESTAMP,
            review_reason TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_merge_suggestions_session \
         ON merge_suggestions(session_guid, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_threshold_config_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS threshold_config (
            session_guid TEXT PRIMARY KEY,
            min_gate_samples INTEGER NOT NULL,
            max_spatial_variance_m REAL NOT NULL,
            cluster_epsilon_m REAL NOT NULL,
            min_quality_weight REAL NOT NULL,
            soft_confidence REAL NOT NULL,
            hard_confidence REAL NOT NULL,
            min_effective_samples INTEGER NOT NULL,
            violation_demote_threshold INTEGER NOT NULL,
            learning_rate REAL NOT NULL,
            merge_distance_m REAL NOT NULL,
            merge_suggest_confidence REAL NOT NULL,
            merge_auto_confidence REAL NOT NULL,
            auto_merge_enabled INTEGER NOT NULL,
            orphan_max_distance_m REAL NOT NULL,
            gate_radius_m REAL NOT NULL,
            out_of_range_factor REAL NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_cycle_checkpoints_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cycle_checkpoints (
            session_guid TEXT NOT NULL,
            cycle TEXT NOT NULL,
            last_event_id INTEGER NOT NULL DEFAULT 0,
            accepted_at_trigger INTEGER NOT NULL DEFAULT 0,
            last_run_at TIMESTAMP,
            PRIMARY KEY (session_guid, cycle)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
