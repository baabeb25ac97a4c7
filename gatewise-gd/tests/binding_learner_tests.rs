//! Binding learner integration tests
//!
//! State machine coverage: lazy creation, confidence accumulation,
//! monotonic promotion, violation-driven demotion, idempotent learning.

mod helpers;

use gatewise_common::db::models::{CategoryBinding, CheckinEvent};
use gatewise_common::ThresholdConfig;
use gatewise_gd::services::BindingLearner;
use helpers::*;
use sqlx::SqlitePool;

async fn fetch_binding(pool: &SqlitePool, gate: &str, category: &str) -> Option<CategoryBinding> {
    sqlx::query_as::<_, CategoryBinding>(
        "SELECT * FROM category_bindings WHERE gate_guid = ? AND category = ?",
    )
    .bind(gate)
    .bind(category)
    .fetch_optional(pool)
    .await
    .unwrap()
}

async fn gated_events(pool: &SqlitePool, session: &str) -> Vec<CheckinEvent> {
    sqlx::query_as::<_, CheckinEvent>(
        r#"
        SELECT id, guid, session_guid, wristband_guid, category, scanned_at,
               latitude, longitude, accuracy_m, quality_weight, gate_guid, outcome
        FROM checkin_events
        WHERE session_guid = ? AND gate_guid IS NOT NULL
        ORDER BY id
        "#,
    )
    .bind(session)
    .fetch_all(pool)
    .await
    .unwrap()
}

/// A category seen repeatedly and exclusively at one gate clears both
/// thresholds and is promoted probation → enforced
#[tokio::test]
async fn test_dominant_category_reaches_enforced() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Festival Day 1").await;
    let gate = insert_gate(&pool, &session, "Main Gate", 47.6062, -122.3321).await;

    for _ in 0..30 {
        insert_scan(&pool, &session, "GENERAL", Some(47.6062), Some(-122.3321), Some(8.0), Some(&gate))
            .await;
    }

    let bus = test_bus();
    let learner = BindingLearner::new(&pool, &bus);
    let events = gated_events(&pool, &session).await;
    let outcome = learner
        .learn_batch(&events, &ThresholdConfig::default())
        .await
        .unwrap();

    assert_eq!(outcome.events_processed, 30);
    assert_eq!(outcome.promotions, 1);

    let binding = fetch_binding(&pool, &gate, "GENERAL").await.unwrap();
    assert_eq!(binding.status.as_str(), "enforced");
    assert_eq!(binding.sample_count, 30);
    assert!(binding.confidence >= 0.80);
}

/// Enforcement needs both thresholds: high confidence with too few
/// samples stays in probation (no state skipping)
#[tokio::test]
async fn test_promotion_requires_minimum_samples() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Festival Day 1").await;
    let gate = insert_gate(&pool, &session, "Main Gate", 47.6062, -122.3321).await;

    // 15 exclusive observations: confidence clears 0.80 (share is 1.0
    // from the first event) but samples stay under min_effective (20)
    for _ in 0..15 {
        insert_scan(&pool, &session, "GENERAL", Some(47.6062), Some(-122.3321), Some(8.0), Some(&gate))
            .await;
    }

    let bus = test_bus();
    let learner = BindingLearner::new(&pool, &bus);
    let events = gated_events(&pool, &session).await;
    learner
        .learn_batch(&events, &ThresholdConfig::default())
        .await
        .unwrap();

    let binding = fetch_binding(&pool, &gate, "GENERAL").await.unwrap();
    assert!(binding.confidence >= 0.80);
    assert_eq!(binding.status.as_str(), "probation");
}

/// A category split across two competing gates is suppressed relative to
/// a category dominant at one gate
#[tokio::test]
async fn test_split_category_confidence_suppressed() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Festival Day 1").await;
    let gate_a = insert_gate(&pool, &session, "Main Gate", 47.6062, -122.3321).await;
    let gate_b = insert_gate(&pool, &session, "North Gate", 47.6092, -122.3321).await;

    // GENERAL alternates between two gates
    for i in 0..40 {
        let gate = if i % 2 == 0 { &gate_a } else { &gate_b };
        insert_scan(&pool, &session, "GENERAL", Some(47.6062), Some(-122.3321), Some(8.0), Some(gate))
            .await;
    }

    let bus = test_bus();
    let learner = BindingLearner::new(&pool, &bus);
    let events = gated_events(&pool, &session).await;
    let outcome = learner
        .learn_batch(&events, &ThresholdConfig::default())
        .await
        .unwrap();

    // A 50/50 split can never approach the 0.80 hard threshold
    assert_eq!(outcome.promotions, 0);
    let binding_a = fetch_binding(&pool, &gate_a, "GENERAL").await.unwrap();
    let binding_b = fetch_binding(&pool, &gate_b, "GENERAL").await.unwrap();
    assert!(binding_a.confidence < 0.65);
    assert!(binding_b.confidence < 0.65);
    assert_eq!(binding_a.status.as_str(), "probation");
    assert_eq!(binding_b.status.as_str(), "probation");
}

/// Learning the same event twice counts once (idempotency ledger)
#[tokio::test]
async fn test_duplicate_event_delivery_counts_once() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Festival Day 1").await;
    let gate = insert_gate(&pool, &session, "Main Gate", 47.6062, -122.3321).await;

    insert_scan(&pool, &session, "GENERAL", Some(47.6062), Some(-122.3321), Some(8.0), Some(&gate))
        .await;

    let bus = test_bus();
    let learner = BindingLearner::new(&pool, &bus);
    let events = gated_events(&pool, &session).await;
    let config = ThresholdConfig::default();

    let first = learner.learn_batch(&events, &config).await.unwrap();
    assert_eq!(first.events_processed, 1);

    // At-least-once delivery replays the same batch
    let second = learner.learn_batch(&events, &config).await.unwrap();
    assert_eq!(second.events_processed, 0);

    let binding = fetch_binding(&pool, &gate, "GENERAL").await.unwrap();
    assert_eq!(binding.sample_count, 1);
}

/// Unknown categories at an enforced gate accrue violations; crossing
/// the threshold demotes the strongest binding enforced → probation
#[tokio::test]
async fn test_sustained_violations_demote_to_probation() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Festival Day 1").await;
    let gate = insert_gate(&pool, &session, "Main Gate", 47.6062, -122.3321).await;
    insert_binding(&pool, &gate, "GENERAL", "enforced", 50, 0.92).await;

    let config = ThresholdConfig {
        violation_demote_threshold: 3,
        ..ThresholdConfig::default()
    };

    // Three first-seen categories at an enforced gate: three violations
    for category in ["STAFF", "PRESS", "CREW"] {
        insert_scan(&pool, &session, category, Some(47.6062), Some(-122.3321), Some(8.0), Some(&gate))
            .await;
    }

    let bus = test_bus();
    let learner = BindingLearner::new(&pool, &bus);
    let events = gated_events(&pool, &session).await;
    let outcome = learner.learn_batch(&events, &config).await.unwrap();

    assert_eq!(outcome.violations_recorded, 3);
    assert_eq!(outcome.demotions, 1);

    let binding = fetch_binding(&pool, &gate, "GENERAL").await.unwrap();
    assert_eq!(binding.status.as_str(), "probation");
    assert_eq!(binding.demotion_count, 1);
    assert_eq!(binding.violation_count, 0);
    // Demotion resets confidence to the soft threshold
    assert!(binding.confidence <= config.soft_confidence + 1e-9);
}

/// A binding already demoted once is forced unbound on the next
/// violation run: enforced → probation → unbound, never skipping
#[tokio::test]
async fn test_second_demotion_forces_unbound() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Festival Day 1").await;
    let gate = insert_gate(&pool, &session, "Main Gate", 47.6062, -122.3321).await;

    // Re-promoted binding carrying one prior demotion
    insert_binding(&pool, &gate, "GENERAL", "enforced", 80, 0.88).await;
    sqlx::query(
        "UPDATE category_bindings SET demotion_count = 1 WHERE gate_guid = ? AND category = ?",
    )
    .bind(&gate)
    .bind("GENERAL")
    .execute(&pool)
    .await
    .unwrap();

    let config = ThresholdConfig {
        violation_demote_threshold: 2,
        ..ThresholdConfig::default()
    };

    for category in ["STAFF", "PRESS"] {
        insert_scan(&pool, &session, category, Some(47.6062), Some(-122.3321), Some(8.0), Some(&gate))
            .await;
    }

    let bus = test_bus();
    let learner = BindingLearner::new(&pool, &bus);
    let events = gated_events(&pool, &session).await;
    let outcome = learner.learn_batch(&events, &config).await.unwrap();

    assert_eq!(outcome.demotions, 1);
    let binding = fetch_binding(&pool, &gate, "GENERAL").await.unwrap();
    assert_eq!(binding.status.as_str(), "unbound");
    assert_eq!(binding.demotion_count, 2);
}

/// An unbound binding keeps accumulating samples but is never promoted
/// without a manual reset
#[tokio::test]
async fn test_unbound_binding_not_promoted_by_learning() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Festival Day 1").await;
    let gate = insert_gate(&pool, &session, "Main Gate", 47.6062, -122.3321).await;
    insert_binding(&pool, &gate, "VIP", "unbound", 40, 0.85).await;

    for _ in 0..25 {
        insert_scan(&pool, &session, "VIP", Some(47.6062), Some(-122.3321), Some(8.0), Some(&gate))
            .await;
    }

    let bus = test_bus();
    let learner = BindingLearner::new(&pool, &bus);
    let events = gated_events(&pool, &session).await;
    let outcome = learner
        .learn_batch(&events, &ThresholdConfig::default())
        .await
        .unwrap();

    assert_eq!(outcome.promotions, 0);
    let binding = fetch_binding(&pool, &gate, "VIP").await.unwrap();
    assert_eq!(binding.status.as_str(), "unbound");
    assert_eq!(binding.sample_count, 65);
}
