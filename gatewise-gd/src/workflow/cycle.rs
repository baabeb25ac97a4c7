//! Cycle runner
//!
//! Executes discovery and enforcement cycles for a venue session. Each
//! cycle is an explicit idempotent reconciliation pass with a bounded
//! work window, resuming from a checkpoint instead of rescanning
//! history. Cycles for the same session never overlap; failures are
//! isolated per session by the spawning call sites.

use chrono::Utc;
use gatewise_common::db::models::{
    CheckinEvent, CycleCheckpoint, SessionStatus, CYCLE_DISCOVERY, CYCLE_ENFORCEMENT,
};
use gatewise_common::db::settings::get_setting_i64;
use gatewise_common::events::{EventBus, GatewiseEvent};
use gatewise_common::geo::GeoPoint;
use gatewise_common::{Result, ThresholdConfig};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::services::{
    assign_orphans, cluster_scans, detect_duplicates, materialize_clusters, BindingLearner,
    ScanPoint,
};
use crate::utils::db_retry::retry_on_lock;
use crate::workflow::CycleRegistry;

/// Result of asking for a cycle run
#[derive(Debug, Clone)]
pub enum CycleOutcome<T> {
    Completed(T),
    /// A cycle for this session is already in flight
    SkippedBusy,
    /// Session is not active; nothing to do
    SkippedInactive,
    /// Session was deactivated mid-cycle; stopped at a work boundary
    Cancelled,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DiscoverySummary {
    pub scans_considered: usize,
    pub clusters_found: usize,
    pub gates_created: usize,
    pub gates_updated: usize,
    pub orphans_assigned: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct EnforcementSummary {
    pub events_learned: usize,
    pub violations_recorded: usize,
    pub promotions: usize,
    pub demotions: usize,
    pub suggestions_created: usize,
    pub merges_auto_applied: usize,
}

/// Orchestrates background cycles over the shared pool and event bus
#[derive(Clone)]
pub struct CycleRunner {
    db: SqlitePool,
    bus: EventBus,
    registry: Arc<CycleRegistry>,
}

impl CycleRunner {
    pub fn new(db: SqlitePool, bus: EventBus, registry: Arc<CycleRegistry>) -> Self {
        Self { db, bus, registry }
    }

    /// Run one discovery cycle: cluster quality-accepted scans,
    /// materialize gates, backfill orphans, checkpoint.
    pub async fn run_discovery_cycle(
        &self,
        session_guid: &str,
    ) -> Result<CycleOutcome<DiscoverySummary>> {
        let lock = self.registry.lock_for(session_guid).await;
        let Ok(_guard) = lock.try_lock() else {
            debug!(session = %session_guid, "Discovery skipped: cycle already in flight");
            return Ok(CycleOutcome::SkippedBusy);
        };

        if !self.session_is_active(session_guid).await? {
            return Ok(CycleOutcome::SkippedInactive);
        }
        let token = self.registry.token_for(session_guid).await;

        let config = ThresholdConfig::load(&self.db, session_guid).await?;
        let max_events = get_setting_i64(&self.db, "gd_cycle_max_events", 1000).await?;
        let orphan_batch = get_setting_i64(&self.db, "gd_orphan_batch_size", 500).await?;
        let max_lock_wait =
            get_setting_i64(&self.db, "gd_database_max_lock_wait_ms", 5000).await? as u64;

        let mut summary = DiscoverySummary::default();

        // Discovery window: the most recent accepted scans, bounded
        let scans = self.accepted_scans(session_guid, &config, max_events).await?;
        summary.scans_considered = scans.len();
        let max_seen_id = scans.iter().map(|s| s.event_id).max().unwrap_or(0);

        if token.is_cancelled() {
            return Ok(CycleOutcome::Cancelled);
        }

        let clusters = cluster_scans(&scans, &config);
        summary.clusters_found = clusters.len();

        if token.is_cancelled() {
            return Ok(CycleOutcome::Cancelled);
        }

        if clusters.is_empty() {
            debug!(session = %session_guid, "No clusters this cycle (insufficient density)");
        } else {
            let outcome = retry_on_lock("materialize clusters", max_lock_wait, || {
                materialize_clusters(&self.db, &self.bus, session_guid, &clusters, &config)
            })
            .await?;
            summary.gates_created = outcome.gates_created;
            summary.gates_updated = outcome.gates_updated;
        }

        if token.is_cancelled() {
            return Ok(CycleOutcome::Cancelled);
        }

        summary.orphans_assigned = retry_on_lock("orphan backfill", max_lock_wait, || {
            assign_orphans(&self.db, session_guid, &config, orphan_batch)
        })
        .await?;

        let accepted_total = self.accepted_count(session_guid, &config).await?;
        self.save_checkpoint(session_guid, CYCLE_DISCOVERY, max_seen_id, accepted_total)
            .await?;

        info!(
            session = %session_guid,
            scans = summary.scans_considered,
            clusters = summary.clusters_found,
            created = summary.gates_created,
            updated = summary.gates_updated,
            orphans = summary.orphans_assigned,
            "Discovery cycle complete"
        );
        self.bus.emit(GatewiseEvent::DiscoveryCycleCompleted {
            session_guid: session_guid.to_string(),
            scans_considered: summary.scans_considered,
            clusters_found: summary.clusters_found,
            gates_created: summary.gates_created,
            gates_updated: summary.gates_updated,
            orphans_assigned: summary.orphans_assigned,
            timestamp: Utc::now(),
        });

        Ok(CycleOutcome::Completed(summary))
    }

    /// Run one enforcement cycle: learn bindings from newly gated events
    /// since the checkpoint, then sweep for duplicate gates.
    pub async fn run_enforcement_cycle(
        &self,
        session_guid: &str,
    ) -> Result<CycleOutcome<EnforcementSummary>> {
        let lock = self.registry.lock_for(session_guid).await;
        let Ok(_guard) = lock.try_lock() else {
            debug!(session = %session_guid, "Enforcement skipped: cycle already in flight");
            return Ok(CycleOutcome::SkippedBusy);
        };

        if !self.session_is_active(session_guid).await? {
            return Ok(CycleOutcome::SkippedInactive);
        }
        let token = self.registry.token_for(session_guid).await;

        let config = ThresholdConfig::load(&self.db, session_guid).await?;
        let max_events = get_setting_i64(&self.db, "gd_cycle_max_events", 1000).await?;
        let max_lock_wait =
            get_setting_i64(&self.db, "gd_database_max_lock_wait_ms", 5000).await? as u64;

        let checkpoint = self.load_checkpoint(session_guid, CYCLE_ENFORCEMENT).await?;

        let events = sqlx::query_as::<_, CheckinEvent>(
            r#"
            SELECT id, guid, session_guid, wristband_guid, category, scanned_at,
                   latitude, longitude, accuracy_m, quality_weight, gate_guid, outcome
            FROM checkin_events
            WHERE session_guid = ? AND id > ?
              AND gate_guid IS NOT NULL AND outcome = 'success'
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(session_guid)
        .bind(checkpoint.last_event_id)
        .bind(max_events)
        .fetch_all(&self.db)
        .await?;

        let mut summary = EnforcementSummary::default();
        let last_id = events.iter().map(|e| e.id).max().unwrap_or(checkpoint.last_event_id);

        if token.is_cancelled() {
            return Ok(CycleOutcome::Cancelled);
        }

        let learner = BindingLearner::new(&self.db, &self.bus);
        let learned = retry_on_lock("binding learning", max_lock_wait, || {
            learner.learn_batch(&events, &config)
        })
        .await?;
        summary.events_learned = learned.events_processed;
        summary.violations_recorded = learned.violations_recorded;
        summary.promotions = learned.promotions;
        summary.demotions = learned.demotions;

        if token.is_cancelled() {
            return Ok(CycleOutcome::Cancelled);
        }

        let detected = retry_on_lock("duplicate detection", max_lock_wait, || {
            detect_duplicates(&self.db, &self.bus, session_guid, &config)
        })
        .await?;
        summary.suggestions_created = detected.suggestions_created;
        summary.merges_auto_applied = detected.auto_applied;

        self.save_checkpoint(
            session_guid,
            CYCLE_ENFORCEMENT,
            last_id,
            checkpoint.accepted_at_trigger,
        )
        .await?;

        info!(
            session = %session_guid,
            learned = summary.events_learned,
            violations = summary.violations_recorded,
            promotions = summary.promotions,
            demotions = summary.demotions,
            suggestions = summary.suggestions_created,
            "Enforcement cycle complete"
        );
        self.bus.emit(GatewiseEvent::EnforcementCycleCompleted {
            session_guid: session_guid.to_string(),
            events_learned: summary.events_learned,
            violations_recorded: summary.violations_recorded,
            suggestions_created: summary.suggestions_created,
            timestamp: Utc::now(),
        });

        Ok(CycleOutcome::Completed(summary))
    }

    /// Milestone trigger, called after ingestion: first discovery at the
    /// configured scan count, refresh every interval thereafter. Runs the
    /// cycles inline; callers spawn this off the request path.
    pub async fn maybe_run_milestone_cycles(&self, session_guid: &str) {
        match self.milestone_due(session_guid).await {
            Ok(true) => {
                if let Err(e) = self.run_discovery_cycle(session_guid).await {
                    warn!(session = %session_guid, error = %e, "Milestone discovery cycle failed");
                }
                if let Err(e) = self.run_enforcement_cycle(session_guid).await {
                    warn!(session = %session_guid, error = %e, "Milestone enforcement cycle failed");
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(session = %session_guid, error = %e, "Milestone check failed");
            }
        }
    }

    async fn milestone_due(&self, session_guid: &str) -> Result<bool> {
        let first = get_setting_i64(&self.db, "gd_discovery_first_milestone", 50).await?;
        let interval = get_setting_i64(&self.db, "gd_discovery_milestone_interval", 100).await?;
        let config = ThresholdConfig::load(&self.db, session_guid).await?;

        let accepted = self.accepted_count(session_guid, &config).await?;
        let checkpoint = self.load_checkpoint(session_guid, CYCLE_DISCOVERY).await?;

        if checkpoint.accepted_at_trigger == 0 {
            return Ok(accepted >= first);
        }
        Ok(accepted - checkpoint.accepted_at_trigger >= interval)
    }

    async fn session_is_active(&self, session_guid: &str) -> Result<bool> {
        let status = sqlx::query_scalar::<_, SessionStatus>(
            "SELECT status FROM venue_sessions WHERE guid = ?",
        )
        .bind(session_guid)
        .fetch_optional(&self.db)
        .await?;

        Ok(status == Some(SessionStatus::Active))
    }

    async fn accepted_scans(
        &self,
        session_guid: &str,
        config: &ThresholdConfig,
        limit: i64,
    ) -> Result<Vec<ScanPoint>> {
        // Most recent window, returned in ascending id order for
        // deterministic clustering
        let mut rows = sqlx::query_as::<_, (i64, f64, f64, f64)>(
            r#"
            SELECT id, latitude, longitude, quality_weight FROM checkin_events
            WHERE session_guid = ? AND quality_weight >= ?
              AND latitude IS NOT NULL AND longitude IS NOT NULL
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(session_guid)
        .bind(config.min_quality_weight)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        rows.reverse();

        Ok(rows
            .into_iter()
            .map(|(id, lat, lon, weight)| ScanPoint {
                event_id: id,
                location: GeoPoint::new(lat, lon),
                quality_weight: weight,
            })
            .collect())
    }

    async fn accepted_count(&self, session_guid: &str, config: &ThresholdConfig) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM checkin_events \
             WHERE session_guid = ? AND quality_weight >= ? \
               AND latitude IS NOT NULL AND longitude IS NOT NULL",
        )
        .bind(session_guid)
        .bind(config.min_quality_weight)
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }

    async fn load_checkpoint(&self, session_guid: &str, cycle: &str) -> Result<CycleCheckpoint> {
        let checkpoint = sqlx::query_as::<_, CycleCheckpoint>(
            "SELECT * FROM cycle_checkpoints WHERE session_guid = ? AND cycle = ?",
        )
        .bind(session_guid)
        .bind(cycle)
        .fetch_optional(&self.db)
        .await?;

        Ok(checkpoint.unwrap_or(CycleCheckpoint {
            session_guid: session_guid.to_string(),
            cycle: cycle.to_string(),
            last_event_id: 0,
            accepted_at_trigger: 0,
            last_run_at: None,
        }))
    }

    async fn save_checkpoint(
        &self,
        session_guid: &str,
        cycle: &str,
        last_event_id: i64,
        accepted_at_trigger: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cycle_checkpoints
                (session_guid, cycle, last_event_id, accepted_at_trigger, last_run_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(session_guid, cycle) DO UPDATE SET
                last_event_id = excluded.last_event_id,
                accepted_at_trigger = excluded.accepted_at_trigger,
                last_run_at = excluded.last_run_at
            "#,
        )
        .bind(session_guid)
        .bind(cycle)
        .bind(last_event_id)
        .bind(accepted_at_trigger)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
