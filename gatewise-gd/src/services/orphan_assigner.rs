//! Orphan Assignment Service
//!
//! Retroactively attaches check-ins that had no gate at scan time to the
//! nearest materialized gate within the configured distance bound.
//! Idempotent: the UPDATE only fires while the gate reference is still
//! null, so re-running never reassigns a resolved event. Never creates
//! gates; out-of-range events stay orphaned and are retried on the next
//! discovery cycle.

use gatewise_common::db::models::Gate;
use gatewise_common::geo::GeoPoint;
use gatewise_common::{Result, ThresholdConfig};
use sqlx::SqlitePool;
use tracing::{debug, info};

/// Assign orphaned check-ins for a session, bounded to `batch_limit`
/// events per run. Returns the number of events assigned.
pub async fn assign_orphans(
    pool: &SqlitePool,
    session_guid: &str,
    config: &ThresholdConfig,
    batch_limit: i64,
) -> Result<usize> {
    let gates = sqlx::query_as::<_, Gate>(
        "SELECT * FROM gates WHERE session_guid = ? AND status = 'active'",
    )
    .bind(session_guid)
    .fetch_all(pool)
    .await?;

    if gates.is_empty() {
        return Ok(0);
    }

    let orphans = sqlx::query_as::<_, (i64, f64, f64)>(
        r#"
        SELECT id, latitude, longitude FROM checkin_events
        WHERE session_guid = ? AND gate_guid IS NULL
          AND latitude IS NOT NULL AND longitude IS NOT NULL
        ORDER BY id
        LIMIT ?
        "#,
    )
    .bind(session_guid)
    .bind(batch_limit)
    .fetch_all(pool)
    .await?;

    let mut assigned = 0usize;
    for (event_id, lat, lon) in orphans {
        let location = GeoPoint::new(lat, lon);
        let nearest = gates
            .iter()
            .map(|g| (g, location.distance_m(&GeoPoint::new(g.latitude, g.longitude))))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        let Some((gate, distance)) = nearest else {
            continue;
        };

        if distance > config.orphan_max_distance_m {
            debug!(
                event_id,
                distance_m = distance,
                "Orphan out of range of all gates, leaving for next cycle"
            );
            continue;
        }

        // Guarded by `gate_guid IS NULL`: a concurrent resolver (or an
        // earlier run) that already attached this event wins.
        let result = sqlx::query(
            "UPDATE checkin_events SET gate_guid = ? WHERE id = ? AND gate_guid IS NULL",
        )
        .bind(&gate.guid)
        .bind(event_id)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            assigned += 1;
        }
    }

    if assigned > 0 {
        info!(session = %session_guid, assigned, "Orphan backfill assigned events");
    }

    Ok(assigned)
}
