//! Merge execution
//!
//! Applies an approved (or auto-applied) MergeSuggestion as one atomic
//! transaction: re-point every CheckinEvent and CategoryBinding from the
//! source gate to the target, recompute the target's centroid and health,
//! deactivate the source, and stamp the suggestion's audit fields.
//! Partial application is never observable; approving stale state (an
//! already-resolved suggestion or a merged-away gate) is rejected.

use chrono::Utc;
use gatewise_common::db::models::{
    BindingStatus, CategoryBinding, Gate, GateStatus, MergeSuggestion, SuggestionStatus,
};
use gatewise_common::events::{EventBus, GatewiseEvent};
use gatewise_common::geo::{self, GeoPoint};
use gatewise_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::info;

use super::materializer::health_score;

/// Apply a pending merge suggestion
///
/// `auto` marks the suggestion auto_applied instead of approved.
pub async fn apply_merge(
    pool: &SqlitePool,
    bus: &EventBus,
    suggestion_guid: &str,
    reviewed_by: Option<&str>,
    reason: Option<&str>,
    auto: bool,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let suggestion = sqlx::query_as::<_, MergeSuggestion>(
        "SELECT * FROM merge_suggestions WHERE guid = ?",
    )
    .bind(suggestion_guid)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Merge suggestion {}", suggestion_guid)))?;

    if suggestion.status != SuggestionStatus::Pending {
        return Err(Error::Stale(format!(
            "Merge suggestion {} is already {:?}",
            suggestion_guid, suggestion.status
        )));
    }

    let source = fetch_gate(&mut tx, &suggestion.source_gate_guid).await?;
    let target = fetch_gate(&mut tx, &suggestion.target_gate_guid).await?;

    if source.status != GateStatus::Active || target.status != GateStatus::Active {
        return Err(Error::Stale(format!(
            "Gate {} or {} is no longer active; refresh and retry",
            source.guid, target.guid
        )));
    }

    let now = Utc::now();

    // Re-point the event log
    sqlx::query("UPDATE checkin_events SET gate_guid = ? WHERE gate_guid = ?")
        .bind(&target.guid)
        .bind(&source.guid)
        .execute(&mut *tx)
        .await?;

    // Fold source bindings into the target's
    let source_bindings = sqlx::query_as::<_, CategoryBinding>(
        "SELECT * FROM category_bindings WHERE gate_guid = ?",
    )
    .bind(&source.guid)
    .fetch_all(&mut *tx)
    .await?;

    for binding in source_bindings {
        let existing = sqlx::query_as::<_, CategoryBinding>(
            "SELECT * FROM category_bindings WHERE gate_guid = ? AND category = ?",
        )
        .bind(&target.guid)
        .bind(&binding.category)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(target_binding) => {
                let status = combine_status(binding.status, target_binding.status);
                sqlx::query(
                    r#"
                    UPDATE category_bindings SET
                        sample_count = ?, confidence = ?, status = ?,
                        violation_count = ?, demotion_count = ?, updated_at = ?
                    WHERE gate_guid = ? AND category = ?
                    "#,
                )
                .bind(target_binding.sample_count + binding.sample_count)
                .bind(target_binding.confidence.max(binding.confidence))
                .bind(status)
                .bind(target_binding.violation_count + binding.violation_count)
                .bind(target_binding.demotion_count.max(binding.demotion_count))
                .bind(now)
                .bind(&target.guid)
                .bind(&binding.category)
                .execute(&mut *tx)
                .await?;

                sqlx::query("DELETE FROM category_bindings WHERE gate_guid = ? AND category = ?")
                    .bind(&source.guid)
                    .bind(&binding.category)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE category_bindings SET gate_guid = ?, updated_at = ? \
                     WHERE gate_guid = ? AND category = ?",
                )
                .bind(&target.guid)
                .bind(now)
                .bind(&source.guid)
                .bind(&binding.category)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    // Recompute the surviving gate from both contributions
    let centroid = geo::weighted_centroid(
        &GeoPoint::new(target.latitude, target.longitude),
        target.sample_count.max(0) as f64,
        &GeoPoint::new(source.latitude, source.longitude),
        source.sample_count.max(0) as f64,
    );
    let sample_count = target.sample_count + source.sample_count;
    let first_seen = match (target.first_seen_at, source.first_seen_at) {
        (Some(t), Some(s)) => Some(t.min(s)),
        (t, s) => t.or(s),
    };
    let last_seen = match (target.last_seen_at, source.last_seen_at) {
        (Some(t), Some(s)) => Some(t.max(s)),
        (t, s) => t.or(s),
    };
    let score = health_score(
        sample_count,
        true,
        first_seen,
        last_seen,
        target.derivation,
        1, // merged gates are never premature
    );

    sqlx::query(
        r#"
        UPDATE gates SET
            latitude = ?, longitude = ?, sample_count = ?, health_score = ?,
            first_seen_at = ?, last_seen_at = ?, updated_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(centroid.latitude)
    .bind(centroid.longitude)
    .bind(sample_count)
    .bind(score)
    .bind(first_seen)
    .bind(last_seen)
    .bind(now)
    .bind(&target.guid)
    .execute(&mut *tx)
    .await?;

    // Soft-delete the source; its bucket row keeps holding the location
    sqlx::query("UPDATE gates SET status = 'inactive', updated_at = ? WHERE guid = ?")
        .bind(now)
        .bind(&source.guid)
        .execute(&mut *tx)
        .await?;

    let final_status = if auto {
        SuggestionStatus::AutoApplied
    } else {
        SuggestionStatus::Approved
    };
    sqlx::query(
        "UPDATE merge_suggestions SET status = ?, reviewed_by = ?, reviewed_at = ?, \
         review_reason = ? WHERE guid = ?",
    )
    .bind(final_status)
    .bind(reviewed_by)
    .bind(now)
    .bind(reason)
    .bind(suggestion_guid)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        session = %suggestion.session_guid,
        source = %source.guid,
        target = %target.guid,
        auto,
        "Merged gates"
    );
    bus.emit(GatewiseEvent::GateMerged {
        session_guid: suggestion.session_guid.clone(),
        source_gate_guid: source.guid.clone(),
        target_gate_guid: target.guid.clone(),
        timestamp: now,
    });

    Ok(())
}

/// Reject a pending suggestion with audit fields
pub async fn reject_suggestion(
    pool: &SqlitePool,
    suggestion_guid: &str,
    reviewed_by: Option<&str>,
    reason: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE merge_suggestions SET status = 'rejected', reviewed_by = ?, \
         reviewed_at = ?, review_reason = ? WHERE guid = ? AND status = 'pending'",
    )
    .bind(reviewed_by)
    .bind(Utc::now())
    .bind(reason)
    .bind(suggestion_guid)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let exists: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM merge_suggestions WHERE guid = ?")
                .bind(suggestion_guid)
                .fetch_one(pool)
                .await?;
        if exists == 0 {
            return Err(Error::NotFound(format!(
                "Merge suggestion {}",
                suggestion_guid
            )));
        }
        return Err(Error::Stale(format!(
            "Merge suggestion {} is no longer pending",
            suggestion_guid
        )));
    }

    Ok(())
}

async fn fetch_gate(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    guid: &str,
) -> Result<Gate> {
    sqlx::query_as::<_, Gate>("SELECT * FROM gates WHERE guid = ?")
        .bind(guid)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Gate {}", guid)))
}

/// Binding status when a source binding folds into an existing target
/// binding: an operator's unbound override survives the merge; otherwise
/// the union of evidence keeps the further-forward state.
fn combine_status(a: BindingStatus, b: BindingStatus) -> BindingStatus {
    use BindingStatus::*;
    match (a, b) {
        (Unbound, _) | (_, Unbound) => Unbound,
        (Enforced, _) | (_, Enforced) => Enforced,
        _ => Probation,
    }
}
