//! Duplicate Gate Detector
//!
//! Periodically compares active gate pairs within a distance envelope,
//! combining proximity with traffic-pattern overlap (hourly activity and
//! category mix) into a merge confidence. High-confidence pairs produce a
//! pending MergeSuggestion for review; only above the separate auto-apply
//! threshold (and with auto-merge policy enabled) is the merge applied
//! without a human.

use chrono::Utc;
use gatewise_common::db::models::Gate;
use gatewise_common::events::{EventBus, GatewiseEvent};
use gatewise_common::geo::GeoPoint;
use gatewise_common::{Result, ThresholdConfig};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::merge_executor;

/// Outcome of one detection sweep
#[derive(Debug, Default, Clone)]
pub struct DetectOutcome {
    pub suggestions_created: usize,
    pub auto_applied: usize,
}

/// Sweep a session's active gates for likely duplicates
pub async fn detect_duplicates(
    pool: &SqlitePool,
    bus: &EventBus,
    session_guid: &str,
    config: &ThresholdConfig,
) -> Result<DetectOutcome> {
    let mut outcome = DetectOutcome::default();

    let gates = sqlx::query_as::<_, Gate>(
        "SELECT * FROM gates WHERE session_guid = ? AND status = 'active' ORDER BY created_at",
    )
    .bind(session_guid)
    .fetch_all(pool)
    .await?;

    if gates.len() < 2 {
        return Ok(outcome);
    }

    for i in 0..gates.len() {
        for j in (i + 1)..gates.len() {
            let a = &gates[i];
            let b = &gates[j];

            let distance = GeoPoint::new(a.latitude, a.longitude)
                .distance_m(&GeoPoint::new(b.latitude, b.longitude));
            if distance > config.merge_distance_m {
                continue;
            }

            if pending_suggestion_exists(pool, &a.guid, &b.guid).await? {
                continue;
            }

            let similarity = traffic_similarity(pool, &a.guid, &b.guid).await?;
            let distance_score = 1.0 - distance / config.merge_distance_m;
            let confidence = 0.5 * distance_score + 0.5 * similarity;

            if confidence < config.merge_suggest_confidence {
                debug!(
                    source = %a.guid,
                    target = %b.guid,
                    confidence,
                    "Gate pair below merge suggestion threshold"
                );
                continue;
            }

            // The busier gate survives the merge
            let (source, target) = if a.sample_count <= b.sample_count {
                (a, b)
            } else {
                (b, a)
            };

            let suggestion_guid = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO merge_suggestions (
                    guid, session_guid, source_gate_guid, target_gate_guid,
                    distance_m, traffic_similarity, confidence, status, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?)
                "#,
            )
            .bind(&suggestion_guid)
            .bind(session_guid)
            .bind(&source.guid)
            .bind(&target.guid)
            .bind(distance)
            .bind(similarity)
            .bind(confidence)
            .bind(Utc::now())
            .execute(pool)
            .await?;

            outcome.suggestions_created += 1;
            info!(
                session = %session_guid,
                source = %source.guid,
                target = %target.guid,
                distance_m = distance,
                confidence,
                "Merge suggestion created"
            );

            let auto = config.auto_merge_enabled && confidence >= config.merge_auto_confidence;
            bus.emit(GatewiseEvent::MergeSuggested {
                suggestion_guid: suggestion_guid.clone(),
                session_guid: session_guid.to_string(),
                source_gate_guid: source.guid.clone(),
                target_gate_guid: target.guid.clone(),
                confidence,
                auto_applied: auto,
                timestamp: Utc::now(),
            });

            if auto {
                merge_executor::apply_merge(pool, bus, &suggestion_guid, None, Some("auto-applied"), true)
                    .await?;
                outcome.auto_applied += 1;
            }
        }
    }

    Ok(outcome)
}

async fn pending_suggestion_exists(
    pool: &SqlitePool,
    gate_a: &str,
    gate_b: &str,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM merge_suggestions
        WHERE status = 'pending'
          AND ((source_gate_guid = ? AND target_gate_guid = ?)
            OR (source_gate_guid = ? AND target_gate_guid = ?))
        "#,
    )
    .bind(gate_a)
    .bind(gate_b)
    .bind(gate_b)
    .bind(gate_a)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Traffic-pattern overlap of two gates in [0, 1]
///
/// 0.6 × cosine similarity of 24-bin hourly check-in histograms plus
/// 0.4 × cosine similarity of category-mix vectors. A gate with no
/// traffic contributes zero similarity.
async fn traffic_similarity(pool: &SqlitePool, gate_a: &str, gate_b: &str) -> Result<f64> {
    let hours_a = hourly_histogram(pool, gate_a).await?;
    let hours_b = hourly_histogram(pool, gate_b).await?;
    let hourly = cosine(&hours_a, &hours_b);

    let mix_a = category_mix(pool, gate_a).await?;
    let mix_b = category_mix(pool, gate_b).await?;
    let categories: Vec<&String> = {
        let mut keys: Vec<&String> = mix_a.keys().chain(mix_b.keys()).collect();
        keys.sort();
        keys.dedup();
        keys
    };
    let vec_a: Vec<f64> = categories.iter().map(|c| *mix_a.get(*c).unwrap_or(&0.0)).collect();
    let vec_b: Vec<f64> = categories.iter().map(|c| *mix_b.get(*c).unwrap_or(&0.0)).collect();
    let category = cosine(&vec_a, &vec_b);

    Ok(0.6 * hourly + 0.4 * category)
}

async fn hourly_histogram(pool: &SqlitePool, gate_guid: &str) -> Result<Vec<f64>> {
    let rows = sqlx::query_as::<_, (i64, i64)>(
        "SELECT CAST(strftime('%H', scanned_at) AS INTEGER), COUNT(*) \
         FROM checkin_events WHERE gate_guid = ? GROUP BY 1",
    )
    .bind(gate_guid)
    .fetch_all(pool)
    .await?;

    let mut histogram = vec![0.0; 24];
    for (hour, count) in rows {
        if (0..24).contains(&hour) {
            histogram[hour as usize] = count as f64;
        }
    }

    Ok(histogram)
}

async fn category_mix(pool: &SqlitePool, gate_guid: &str) -> Result<BTreeMap<String, f64>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT category, COUNT(*) FROM checkin_events WHERE gate_guid = ? GROUP BY category",
    )
    .bind(gate_guid)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(c, n)| (c, n as f64)).collect())
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}
