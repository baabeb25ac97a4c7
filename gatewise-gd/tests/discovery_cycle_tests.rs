//! Discovery cycle integration tests
//!
//! End-to-end over a real database: quality filtering into clustering,
//! gate materialization, orphan backfill, checkpointing, and milestone
//! arithmetic.

mod helpers;

use gatewise_common::db::models::Gate;
use gatewise_gd::workflow::{CycleOutcome, CycleRegistry, CycleRunner};
use helpers::*;
use std::sync::Arc;

fn runner(pool: &sqlx::SqlitePool) -> CycleRunner {
    CycleRunner::new(pool.clone(), test_bus(), Arc::new(CycleRegistry::new()))
}

/// Sixty tight scans at one spot produce exactly one gate whose centroid
/// sits inside the scan cloud
#[tokio::test]
async fn test_tight_scan_cloud_materializes_one_gate() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Festival Day 1").await;

    // 60 scans within ~5 meters, all GENERAL, good accuracy
    let base_lat = 47.6062;
    let base_lon = -122.3321;
    for i in 0..60 {
        let jitter = lat_step(5.0) * ((i % 5) as f64 / 5.0);
        insert_scan(
            &pool,
            &session,
            "GENERAL",
            Some(base_lat + jitter),
            Some(base_lon),
            Some(8.0),
            None,
        )
        .await;
    }

    let outcome = runner(&pool).run_discovery_cycle(&session).await.unwrap();
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected completed cycle");
    };

    assert_eq!(summary.clusters_found, 1);
    assert_eq!(summary.gates_created, 1);
    assert_eq!(count_gates(&pool, &session).await, 1);

    let gate = sqlx::query_as::<_, Gate>("SELECT * FROM gates WHERE session_guid = ?")
        .bind(&session)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(gate.name, "Main Gate");
    assert!((gate.latitude - base_lat).abs() < lat_step(10.0));
    assert!(gate.sample_count >= 60);

    // All 60 scans were orphans at insert; backfill resolves them
    assert_eq!(summary.orphans_assigned, 60);
}

/// A low-accuracy scan (80m → weight 0.4) is stored but never enters
/// clustering input
#[tokio::test]
async fn test_low_quality_scan_excluded_from_clustering() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Festival Day 1").await;

    // Not enough accepted scans for a cluster, plus a pile of rejected ones
    for _ in 0..5 {
        insert_scan(&pool, &session, "GENERAL", Some(47.6062), Some(-122.3321), Some(8.0), None)
            .await;
    }
    for _ in 0..20 {
        insert_scan(&pool, &session, "GENERAL", Some(47.6062), Some(-122.3321), Some(80.0), None)
            .await;
    }

    let outcome = runner(&pool).run_discovery_cycle(&session).await.unwrap();
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected completed cycle");
    };

    // 5 accepted < min_gate_samples (10): no gate
    assert_eq!(summary.scans_considered, 5);
    assert_eq!(summary.clusters_found, 0);
    assert_eq!(count_gates(&pool, &session).await, 0);

    // The rejected scans are still on record
    let stored: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM checkin_events WHERE quality_weight = 0.4")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(stored, 20);
}

/// Re-running discovery over the same scan set is stable: the same gate,
/// refined rather than duplicated
#[tokio::test]
async fn test_rerun_updates_instead_of_duplicating() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Festival Day 1").await;

    for _ in 0..30 {
        insert_scan(&pool, &session, "GENERAL", Some(47.6062), Some(-122.3321), Some(8.0), None)
            .await;
    }

    let r = runner(&pool);
    r.run_discovery_cycle(&session).await.unwrap();
    assert_eq!(count_gates(&pool, &session).await, 1);

    let r2 = runner(&pool);
    let outcome = r2.run_discovery_cycle(&session).await.unwrap();
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected completed cycle");
    };

    assert_eq!(count_gates(&pool, &session).await, 1);
    assert_eq!(summary.gates_created, 0);
    assert_eq!(summary.gates_updated, 1);
}

/// Two well-separated scan clouds become two distinct gates with
/// tier-based names
#[tokio::test]
async fn test_two_clusters_two_gates() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Festival Day 1").await;

    for _ in 0..40 {
        insert_scan(&pool, &session, "GENERAL", Some(47.6062), Some(-122.3321), Some(8.0), None)
            .await;
    }
    // Second entrance ~300m north
    for _ in 0..25 {
        insert_scan(
            &pool,
            &session,
            "VIP",
            Some(47.6062 + lat_step(300.0)),
            Some(-122.3321),
            Some(8.0),
            None,
        )
        .await;
    }

    let outcome = runner(&pool).run_discovery_cycle(&session).await.unwrap();
    let CycleOutcome::Completed(summary) = outcome else {
        panic!("expected completed cycle");
    };

    assert_eq!(summary.clusters_found, 2);
    assert_eq!(summary.gates_created, 2);

    let names: Vec<String> =
        sqlx::query_scalar("SELECT name FROM gates WHERE session_guid = ? ORDER BY sample_count DESC")
            .bind(&session)
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(names[0], "Main Gate");
    assert!(names[1].starts_with("Secondary Gate"));
}

/// An inactive session's cycles are skipped entirely
#[tokio::test]
async fn test_inactive_session_skipped() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Closed Event").await;
    sqlx::query("UPDATE venue_sessions SET status = 'inactive' WHERE guid = ?")
        .bind(&session)
        .execute(&pool)
        .await
        .unwrap();

    let outcome = runner(&pool).run_discovery_cycle(&session).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::SkippedInactive));
}

/// The discovery checkpoint advances so later cycles resume rather than
/// rescan
#[tokio::test]
async fn test_checkpoint_advances() {
    let (_dir, pool) = setup_test_db().await;
    let session = create_session(&pool, "Festival Day 1").await;

    for _ in 0..15 {
        insert_scan(&pool, &session, "GENERAL", Some(47.6062), Some(-122.3321), Some(8.0), None)
            .await;
    }
    runner(&pool).run_discovery_cycle(&session).await.unwrap();

    let (last_event_id, accepted): (i64, i64) = sqlx::query_as(
        "SELECT last_event_id, accepted_at_trigger FROM cycle_checkpoints \
         WHERE session_guid = ? AND cycle = 'discovery'",
    )
    .bind(&session)
    .fetch_one(&pool)
    .await
    .unwrap();

    assert!(last_event_id >= 15);
    assert_eq!(accepted, 15);
}
