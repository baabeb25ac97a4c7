//! Category-Binding Learner
//!
//! Maintains the per-(gate, category) state machine: probation
//! (observational) → enforced (actively flagging mismatches) → demoted
//! back to probation or forced unbound under sustained violations.
//! Promotion only moves forward, demotion only backward; neither skips a
//! state.
//!
//! Confidence accumulates by exponential approach toward the category's
//! dominance share at the gate: a category seen only at one gate
//! approaches 1.0, a category split across competing gates is suppressed
//! toward its traffic share. Each check-in event is applied exactly once
//! (the learned_events ledger absorbs at-least-once delivery).

use chrono::Utc;
use gatewise_common::db::models::{BindingStatus, CategoryBinding, CheckinEvent, CheckinOutcome};
use gatewise_common::events::{EventBus, GatewiseEvent};
use gatewise_common::{Result, ThresholdConfig};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

/// Outcome of learning a batch of check-in events
#[derive(Debug, Default, Clone)]
pub struct LearnOutcome {
    pub events_processed: usize,
    pub violations_recorded: usize,
    pub promotions: usize,
    pub demotions: usize,
}

/// Drives category-binding state for resolved check-ins
pub struct BindingLearner<'a> {
    pool: &'a SqlitePool,
    bus: &'a EventBus,
}

impl<'a> BindingLearner<'a> {
    pub fn new(pool: &'a SqlitePool, bus: &'a EventBus) -> Self {
        Self { pool, bus }
    }

    /// Apply a batch of events (typically everything since the
    /// enforcement checkpoint). Events without a resolved gate or with a
    /// non-success outcome are skipped.
    pub async fn learn_batch(
        &self,
        events: &[CheckinEvent],
        config: &ThresholdConfig,
    ) -> Result<LearnOutcome> {
        let mut outcome = LearnOutcome::default();

        for event in events {
            if event.outcome != CheckinOutcome::Success || event.gate_guid.is_none() {
                continue;
            }
            let result = self.learn_event(event, config).await?;
            if result.processed {
                outcome.events_processed += 1;
            }
            if result.violation {
                outcome.violations_recorded += 1;
            }
            if result.promoted {
                outcome.promotions += 1;
            }
            if result.demoted {
                outcome.demotions += 1;
            }
        }

        Ok(outcome)
    }

    /// Apply a single resolved check-in event exactly once
    pub async fn learn_event(
        &self,
        event: &CheckinEvent,
        config: &ThresholdConfig,
    ) -> Result<EventLearnResult> {
        let gate_guid = match &event.gate_guid {
            Some(g) => g.clone(),
            None => return Ok(EventLearnResult::skipped()),
        };

        let mut result = EventLearnResult::skipped();
        let mut emitted: Vec<GatewiseEvent> = Vec::new();

        let mut tx = self.pool.begin().await?;

        // Idempotency ledger: second delivery of the same event is a no-op
        let inserted = sqlx::query("INSERT OR IGNORE INTO learned_events (event_guid) VALUES (?)")
            .bind(&event.guid)
            .execute(&mut *tx)
            .await?;
        if inserted.rows_affected() == 0 {
            debug!(event = %event.guid, "Event already learned, skipping");
            return Ok(result);
        }
        result.processed = true;

        let binding = sqlx::query_as::<_, CategoryBinding>(
            "SELECT * FROM category_bindings WHERE gate_guid = ? AND category = ?",
        )
        .bind(&gate_guid)
        .bind(&event.category)
        .fetch_optional(&mut *tx)
        .await?;

        // A category with no probation/enforced binding arriving at a
        // gate that already enforces another category is a violation
        // against that gate.
        let is_unknown_category = match &binding {
            None => true,
            Some(b) => b.status == BindingStatus::Unbound,
        };
        if is_unknown_category {
            if let Some(strongest) = strongest_enforced_binding(&mut tx, &gate_guid).await? {
                result.violation = true;
                let demoted =
                    record_violation(&mut tx, &strongest, config, &mut emitted).await?;
                result.demoted = demoted;
            }
        }

        // Lazily create the binding on first observation
        if binding.is_none() {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO category_bindings
                    (gate_guid, category, sample_count, confidence, status,
                     violation_count, demotion_count, created_at, updated_at)
                VALUES (?, ?, 0, 0.0, 'probation', 0, 0, ?, ?)
                "#,
            )
            .bind(&gate_guid)
            .bind(&event.category)
            .bind(Utc::now())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        // Accumulate evidence: bump the sample count, then pull the
        // confidence toward the category's dominance share at this gate.
        sqlx::query(
            "UPDATE category_bindings SET sample_count = sample_count + 1, updated_at = ? \
             WHERE gate_guid = ? AND category = ?",
        )
        .bind(Utc::now())
        .bind(&gate_guid)
        .bind(&event.category)
        .execute(&mut *tx)
        .await?;

        let own_samples: i64 = sqlx::query_scalar(
            "SELECT sample_count FROM category_bindings WHERE gate_guid = ? AND category = ?",
        )
        .bind(&gate_guid)
        .bind(&event.category)
        .fetch_one(&mut *tx)
        .await?;

        let session_samples: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(b.sample_count), 0)
            FROM category_bindings b
            JOIN gates g ON g.guid = b.gate_guid
            WHERE g.session_guid = ? AND b.category = ?
            "#,
        )
        .bind(&event.session_guid)
        .bind(&event.category)
        .fetch_one(&mut *tx)
        .await?;

        let share = own_samples as f64 / session_samples.max(1) as f64;

        let current = sqlx::query_as::<_, CategoryBinding>(
            "SELECT * FROM category_bindings WHERE gate_guid = ? AND category = ?",
        )
        .bind(&gate_guid)
        .bind(&event.category)
        .fetch_one(&mut *tx)
        .await?;

        let confidence =
            (current.confidence + config.learning_rate * (share - current.confidence)).clamp(0.0, 1.0);

        sqlx::query(
            "UPDATE category_bindings SET confidence = ?, updated_at = ? \
             WHERE gate_guid = ? AND category = ?",
        )
        .bind(confidence)
        .bind(Utc::now())
        .bind(&gate_guid)
        .bind(&event.category)
        .execute(&mut *tx)
        .await?;

        // Promotion: probation → enforced, never skipping probation and
        // never resurrecting an unbound binding.
        if current.status == BindingStatus::Probation
            && confidence >= config.hard_confidence
            && own_samples >= config.min_effective_samples
        {
            sqlx::query(
                "UPDATE category_bindings SET status = 'enforced', updated_at = ? \
                 WHERE gate_guid = ? AND category = ?",
            )
            .bind(Utc::now())
            .bind(&gate_guid)
            .bind(&event.category)
            .execute(&mut *tx)
            .await?;

            result.promoted = true;
            info!(
                gate = %gate_guid,
                category = %event.category,
                confidence,
                samples = own_samples,
                "Binding promoted to enforced"
            );
            emitted.push(GatewiseEvent::BindingPromoted {
                gate_guid: gate_guid.clone(),
                category: event.category.clone(),
                confidence,
                sample_count: own_samples,
                timestamp: Utc::now(),
            });
        }

        tx.commit().await?;

        for e in emitted {
            self.bus.emit(e);
        }

        Ok(result)
    }
}

/// Per-event learning result
#[derive(Debug, Default, Clone, Copy)]
pub struct EventLearnResult {
    pub processed: bool,
    pub violation: bool,
    pub promoted: bool,
    pub demoted: bool,
}

impl EventLearnResult {
    fn skipped() -> Self {
        Self::default()
    }
}

async fn strongest_enforced_binding(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    gate_guid: &str,
) -> Result<Option<CategoryBinding>> {
    let binding = sqlx::query_as::<_, CategoryBinding>(
        "SELECT * FROM category_bindings WHERE gate_guid = ? AND status = 'enforced' \
         ORDER BY confidence DESC, sample_count DESC LIMIT 1",
    )
    .bind(gate_guid)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(binding)
}

/// Record one violation against the gate's strongest enforced binding;
/// demote when the counter crosses the threshold. First demotion lands in
/// probation (confidence reset to the soft threshold); a binding that was
/// already demoted once is forced unbound.
///
/// Returns true when a demotion happened.
async fn record_violation(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    binding: &CategoryBinding,
    config: &ThresholdConfig,
    emitted: &mut Vec<GatewiseEvent>,
) -> Result<bool> {
    let violations = binding.violation_count + 1;
    let now = Utc::now();

    if violations < config.violation_demote_threshold {
        sqlx::query(
            "UPDATE category_bindings SET violation_count = ?, last_violation_at = ?, updated_at = ? \
             WHERE gate_guid = ? AND category = ?",
        )
        .bind(violations)
        .bind(now)
        .bind(now)
        .bind(&binding.gate_guid)
        .bind(&binding.category)
        .execute(&mut **tx)
        .await?;

        return Ok(false);
    }

    let new_status = if binding.demotion_count == 0 {
        BindingStatus::Probation
    } else {
        BindingStatus::Unbound
    };

    sqlx::query(
        r#"
        UPDATE category_bindings SET
            status = ?, confidence = ?, violation_count = 0,
            demotion_count = demotion_count + 1,
            last_violation_at = ?, updated_at = ?
        WHERE gate_guid = ? AND category = ?
        "#,
    )
    .bind(new_status)
    .bind(config.soft_confidence.min(binding.confidence))
    .bind(now)
    .bind(now)
    .bind(&binding.gate_guid)
    .bind(&binding.category)
    .execute(&mut **tx)
    .await?;

    warn!(
        gate = %binding.gate_guid,
        category = %binding.category,
        violations,
        new_status = new_status.as_str(),
        "Binding demoted after sustained violations"
    );
    emitted.push(GatewiseEvent::BindingDemoted {
        gate_guid: binding.gate_guid.clone(),
        category: binding.category.clone(),
        new_status: new_status.as_str().to_string(),
        violation_count: violations,
        timestamp: now,
    });

    Ok(true)
}
