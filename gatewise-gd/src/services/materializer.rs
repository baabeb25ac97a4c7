//! Gate Materializer
//!
//! Reconciles clustering output with the persistent gates of a venue
//! session. Clusters that overlap an existing active gate refine it
//! (rolling weighted centroid, health refresh); the rest become new
//! gates. Creation is guarded by the UNIQUE(session, lat_bucket,
//! lon_bucket) index: when two reconcile runs race over the same physical
//! cluster, exactly one insert wins and the loser detects the conflict
//! and folds its cluster into the winner instead.

use chrono::{DateTime, Duration, Utc};
use gatewise_common::db::models::{Gate, GateDerivation, GateStatus};
use gatewise_common::events::{EventBus, GatewiseEvent};
use gatewise_common::geo::{self, GeoPoint};
use gatewise_common::{Result, ThresholdConfig};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::clustering::Cluster;

/// Rounded-centroid bucket size in degrees (~28m of latitude). Coarse
/// enough that two concurrent materializations of the same physical
/// cluster land in the same bucket, fine enough that distinct gates at
/// venue scale do not.
const BUCKET_DEG: f64 = 0.00025;

/// Outcome of one reconcile run
#[derive(Debug, Default, Clone)]
pub struct MaterializeOutcome {
    pub gates_created: usize,
    pub gates_updated: usize,
}

pub fn location_bucket(value: f64) -> i64 {
    (value / BUCKET_DEG).round() as i64
}

/// Health score for a gate, clamped to [0, 100]
///
/// Base 50, plus up to 30 for check-in volume, 15 for a valid centroid,
/// 10 for an hour or more of sustained activity; minus 20 when the gate
/// was auto-created below the minimum sample count (penalizes premature
/// materialization).
pub fn health_score(
    sample_count: i64,
    has_valid_location: bool,
    first_seen_at: Option<DateTime<Utc>>,
    last_seen_at: Option<DateTime<Utc>>,
    derivation: GateDerivation,
    min_gate_samples: i64,
) -> f64 {
    let mut score = 50.0;

    score += (sample_count as f64 * 0.3).min(30.0);

    if has_valid_location {
        score += 15.0;
    }

    if let (Some(first), Some(last)) = (first_seen_at, last_seen_at) {
        if last.signed_duration_since(first) >= Duration::hours(1) {
            score += 10.0;
        }
    }

    if derivation == GateDerivation::Clustered && sample_count < min_gate_samples {
        score -= 20.0;
    }

    score.clamp(0.0, 100.0)
}

/// Reconcile one clustering run into persistent gates
///
/// Clusters arrive largest-first from the clustering engine; tier naming
/// depends on that ordering.
pub async fn materialize_clusters(
    pool: &SqlitePool,
    bus: &EventBus,
    session_guid: &str,
    clusters: &[Cluster],
    config: &ThresholdConfig,
) -> Result<MaterializeOutcome> {
    let mut outcome = MaterializeOutcome::default();
    if clusters.is_empty() {
        return Ok(outcome);
    }

    let largest_size = clusters[0].size();
    let mut existing = active_gates(pool, session_guid).await?;

    for cluster in clusters {
        // Overlap check: a cluster centroid within epsilon of an active
        // gate refines that gate rather than creating a twin.
        let matched = existing
            .iter()
            .map(|g| {
                let d = cluster
                    .centroid
                    .distance_m(&GeoPoint::new(g.latitude, g.longitude));
                (g.guid.clone(), d)
            })
            .filter(|(_, d)| *d <= config.cluster_epsilon_m)
            .min_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((gate_guid, distance)) = matched {
            debug!(gate = %gate_guid, distance_m = distance, "Cluster refines existing gate");
            update_gate_with_cluster(pool, bus, session_guid, &gate_guid, cluster, config).await?;
            outcome.gates_updated += 1;
            continue;
        }

        match insert_gate(
            pool,
            bus,
            session_guid,
            cluster,
            largest_size,
            existing.len() + outcome.gates_created,
            config,
        )
        .await?
        {
            InsertResult::Created(gate) => {
                outcome.gates_created += 1;
                existing.push(gate);
            }
            InsertResult::LostRace(winner_guid) => {
                // A concurrent run materialized this cluster first; fall
                // back to updating the winner.
                update_gate_with_cluster(pool, bus, session_guid, &winner_guid, cluster, config)
                    .await?;
                outcome.gates_updated += 1;
            }
            InsertResult::BucketHeldByInactive => {}
        }
    }

    info!(
        session = %session_guid,
        created = outcome.gates_created,
        updated = outcome.gates_updated,
        "Materialization complete"
    );

    Ok(outcome)
}

enum InsertResult {
    Created(Gate),
    LostRace(String),
    BucketHeldByInactive,
}

async fn insert_gate(
    pool: &SqlitePool,
    bus: &EventBus,
    session_guid: &str,
    cluster: &Cluster,
    largest_size: usize,
    gates_before: usize,
    config: &ThresholdConfig,
) -> Result<InsertResult> {
    let guid = Uuid::new_v4().to_string();
    let now = Utc::now();
    let lat_bucket = location_bucket(cluster.centroid.latitude);
    let lon_bucket = location_bucket(cluster.centroid.longitude);
    let name = tier_name(cluster.size(), largest_size, gates_before);
    let score = health_score(
        cluster.size() as i64,
        true,
        Some(now),
        Some(now),
        GateDerivation::Clustered,
        config.min_gate_samples,
    );

    let result = sqlx::query(
        r#"
        INSERT INTO gates (
            guid, session_guid, name, latitude, longitude,
            lat_bucket, lon_bucket, derivation, health_score, status,
            spatial_variance_m, sample_count, first_seen_at, last_seen_at,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 'clustered', ?, 'active', ?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_guid, lat_bucket, lon_bucket) DO NOTHING
        "#,
    )
    .bind(&guid)
    .bind(session_guid)
    .bind(&name)
    .bind(cluster.centroid.latitude)
    .bind(cluster.centroid.longitude)
    .bind(lat_bucket)
    .bind(lon_bucket)
    .bind(score)
    .bind(cluster.variance_m)
    .bind(cluster.size() as i64)
    .bind(now)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        // Lost the uniqueness race (or the bucket belongs to a
        // merged-away gate, which keeps holding it so traffic flows to
        // its merge target instead of resurrecting it).
        let winner = sqlx::query_as::<_, Gate>(
            "SELECT * FROM gates WHERE session_guid = ? AND lat_bucket = ? AND lon_bucket = ?",
        )
        .bind(session_guid)
        .bind(lat_bucket)
        .bind(lon_bucket)
        .fetch_optional(pool)
        .await?;

        return match winner {
            Some(gate) if gate.status == GateStatus::Active => {
                debug!(gate = %gate.guid, "Concurrent materialization won this cluster");
                Ok(InsertResult::LostRace(gate.guid))
            }
            Some(gate) => {
                warn!(gate = %gate.guid, "Cluster bucket held by non-active gate, skipping");
                Ok(InsertResult::BucketHeldByInactive)
            }
            None => Ok(InsertResult::BucketHeldByInactive),
        };
    }

    info!(
        gate = %guid,
        session = %session_guid,
        name = %name,
        samples = cluster.size(),
        "Created gate from cluster"
    );

    bus.emit(GatewiseEvent::GateCreated {
        gate_guid: guid.clone(),
        session_guid: session_guid.to_string(),
        name: name.clone(),
        latitude: cluster.centroid.latitude,
        longitude: cluster.centroid.longitude,
        sample_count: cluster.size() as i64,
        health_score: score,
        timestamp: now,
    });

    let gate = sqlx::query_as::<_, Gate>("SELECT * FROM gates WHERE guid = ?")
        .bind(&guid)
        .fetch_one(pool)
        .await?;

    Ok(InsertResult::Created(gate))
}

/// Fold a cluster into an existing gate: sample-weighted centroid,
/// blended variance, refreshed health. Buckets stay frozen at the
/// creation-time value so a drifting centroid cannot collide with a
/// neighboring gate's bucket.
async fn update_gate_with_cluster(
    pool: &SqlitePool,
    bus: &EventBus,
    session_guid: &str,
    gate_guid: &str,
    cluster: &Cluster,
    config: &ThresholdConfig,
) -> Result<()> {
    let gate = sqlx::query_as::<_, Gate>("SELECT * FROM gates WHERE guid = ?")
        .bind(gate_guid)
        .fetch_one(pool)
        .await?;

    let now = Utc::now();
    let old_weight = gate.sample_count.max(0) as f64;
    let new_weight = cluster.size() as f64;
    let centroid = geo::weighted_centroid(
        &GeoPoint::new(gate.latitude, gate.longitude),
        old_weight,
        &cluster.centroid,
        new_weight,
    );
    let variance = if old_weight + new_weight > 0.0 {
        (gate.spatial_variance_m * old_weight + cluster.variance_m * new_weight)
            / (old_weight + new_weight)
    } else {
        cluster.variance_m
    };
    let sample_count = gate.sample_count + cluster.size() as i64;
    let first_seen = gate.first_seen_at.or(Some(now));
    let score = health_score(
        sample_count,
        true,
        first_seen,
        Some(now),
        gate.derivation,
        config.min_gate_samples,
    );

    sqlx::query(
        r#"
        UPDATE gates SET
            latitude = ?, longitude = ?, spatial_variance_m = ?,
            sample_count = ?, health_score = ?,
            first_seen_at = ?, last_seen_at = ?, updated_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(centroid.latitude)
    .bind(centroid.longitude)
    .bind(variance)
    .bind(sample_count)
    .bind(score)
    .bind(first_seen)
    .bind(now)
    .bind(now)
    .bind(gate_guid)
    .execute(pool)
    .await?;

    bus.emit(GatewiseEvent::GateUpdated {
        gate_guid: gate_guid.to_string(),
        session_guid: session_guid.to_string(),
        sample_count,
        health_score: score,
        timestamp: now,
    });

    Ok(())
}

/// Volume-tier naming for newly materialized gates
///
/// Presentation convenience only: the first gate in a session takes
/// "Main Gate"; clusters at half the volume of the run's largest become
/// "Secondary Gate N", the rest "Access Point N".
fn tier_name(cluster_size: usize, largest_size: usize, gates_before: usize) -> String {
    if gates_before == 0 {
        return "Main Gate".to_string();
    }
    let n = gates_before + 1;
    if cluster_size * 2 >= largest_size {
        format!("Secondary Gate {}", n)
    } else {
        format!("Access Point {}", n)
    }
}

async fn active_gates(pool: &SqlitePool, session_guid: &str) -> Result<Vec<Gate>> {
    let gates = sqlx::query_as::<_, Gate>(
        "SELECT * FROM gates WHERE session_guid = ? AND status = 'active' ORDER BY created_at",
    )
    .bind(session_guid)
    .fetch_all(pool)
    .await?;

    Ok(gates)
}
