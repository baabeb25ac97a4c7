//! Service-level settings
//!
//! Key-value settings for process-wide tunables (cycle cadence, retry
//! limits, event bus capacity). Per-session clustering/enforcement
//! thresholds live in `threshold_config` instead; see `crate::params`.

use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Initialize or update default settings
///
/// Ensures all required settings exist with default values. Existing
/// values are left alone; NULL values are reset to defaults.
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Discovery cycle triggering
    ensure_setting(pool, "gd_discovery_first_milestone", "50").await?;
    ensure_setting(pool, "gd_discovery_milestone_interval", "100").await?;

    // Bounded work windows per background cycle
    ensure_setting(pool, "gd_cycle_max_events", "1000").await?;
    ensure_setting(pool, "gd_orphan_batch_size", "500").await?;

    // Database lock handling
    ensure_setting(pool, "gd_database_max_lock_wait_ms", "5000").await?;
    ensure_setting(pool, "gd_database_lock_retry_ms", "250").await?;

    // Event bus / SSE
    ensure_setting(pool, "gd_event_bus_capacity", "1000").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ? AND value IS NOT NULL)")
            .bind(key)
            .fetch_one(pool)
            .await?;

    if !exists {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Read an integer setting, falling back to a default when missing or unparseable
pub async fn get_setting_i64(pool: &SqlitePool, key: &str, default: i64) -> Result<i64> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(value.and_then(|v| v.parse().ok()).unwrap_or(default))
}

/// Read a string setting
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(value)
}

/// Write a setting value
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}
