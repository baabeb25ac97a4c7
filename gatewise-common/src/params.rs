//! Adaptive threshold parameters
//!
//! Per-venue-session tunables for gate discovery and category-binding
//! enforcement. Stored in the `threshold_config` table; sessions without a
//! stored row use the defaults. Writes are validated before they touch the
//! database, so an invalid payload never clobbers a working config.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Per-session threshold configuration
///
/// The confidence constants (0.70 soft / 0.80 hard / 20 effective samples)
/// are defaults, not law; operators tune them per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ThresholdConfig {
    /// Minimum cluster size before a gate may be materialized
    ///
    /// Default: 10
    pub min_gate_samples: i64,

    /// Maximum mean distance (m) of cluster members from their centroid;
    /// looser clusters are discarded as GPS noise
    ///
    /// Default: 50.0
    pub max_spatial_variance_m: f64,

    /// Neighborhood radius (m) for density clustering; two scans within
    /// this distance chain into the same cluster
    ///
    /// Default: 25.0
    pub cluster_epsilon_m: f64,

    /// Minimum GPS quality weight for a scan to enter clustering
    ///
    /// Valid range: [0.0, 1.0]. Default: 0.6
    pub min_quality_weight: f64,

    /// Soft confidence threshold (advisory floor, e.g. demotion target)
    ///
    /// Valid range: (0.0, 1.0], must be < hard_confidence. Default: 0.70
    pub soft_confidence: f64,

    /// Hard confidence threshold for binding promotion to enforced
    ///
    /// Valid range: (0.0, 1.0]. Default: 0.80
    pub hard_confidence: f64,

    /// Minimum sample count before a binding may be enforced
    ///
    /// Default: 20
    pub min_effective_samples: i64,

    /// Violations against an enforced gate before its strongest binding
    /// is demoted
    ///
    /// Default: 10
    pub violation_demote_threshold: i64,

    /// Exponential-approach rate for confidence updates
    ///
    /// Valid range: (0.0, 1.0]. Default: 0.15
    pub learning_rate: f64,

    /// Distance envelope (m) within which gate pairs are compared for
    /// duplicate detection
    ///
    /// Default: 25.0
    pub merge_distance_m: f64,

    /// Similarity confidence at which a MergeSuggestion is emitted
    ///
    /// Default: 0.70
    pub merge_suggest_confidence: f64,

    /// Similarity confidence at which a merge may apply automatically
    /// (when auto_merge_enabled)
    ///
    /// Default: 0.90
    pub merge_auto_confidence: f64,

    /// Whether high-confidence merge suggestions apply without review
    ///
    /// Default: false
    pub auto_merge_enabled: bool,

    /// Maximum distance (m) for orphan check-in backfill assignment
    ///
    /// Default: 75.0
    pub orphan_max_distance_m: f64,

    /// Accepted radius (m) around a gate centroid for validation
    ///
    /// Default: 50.0
    pub gate_radius_m: f64,

    /// Multiplier on gate_radius_m beyond which validation denies
    /// out-of-range
    ///
    /// Default: 2.0
    pub out_of_range_factor: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            min_gate_samples: 10,
            max_spatial_variance_m: 50.0,
            cluster_epsilon_m: 25.0,
            min_quality_weight: 0.6,
            soft_confidence: 0.70,
            hard_confidence: 0.80,
            min_effective_samples: 20,
            violation_demote_threshold: 10,
            learning_rate: 0.15,
            merge_distance_m: 25.0,
            merge_suggest_confidence: 0.70,
            merge_auto_confidence: 0.90,
            auto_merge_enabled: false,
            orphan_max_distance_m: 75.0,
            gate_radius_m: 50.0,
            out_of_range_factor: 2.0,
        }
    }
}

impl ThresholdConfig {
    /// Validate invariants; called before any write
    pub fn validate(&self) -> Result<()> {
        if !(self.soft_confidence > 0.0 && self.soft_confidence <= 1.0) {
            return Err(Error::InvalidInput(format!(
                "soft_confidence must be in (0, 1], got {}",
                self.soft_confidence
            )));
        }
        if !(self.hard_confidence > 0.0 && self.hard_confidence <= 1.0) {
            return Err(Error::InvalidInput(format!(
                "hard_confidence must be in (0, 1], got {}",
                self.hard_confidence
            )));
        }
        if self.soft_confidence >= self.hard_confidence {
            return Err(Error::InvalidInput(format!(
                "soft_confidence ({}) must be below hard_confidence ({})",
                self.soft_confidence, self.hard_confidence
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(Error::InvalidInput(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.min_quality_weight) {
            return Err(Error::InvalidInput(format!(
                "min_quality_weight must be in [0, 1], got {}",
                self.min_quality_weight
            )));
        }
        if self.min_gate_samples < 1 {
            return Err(Error::InvalidInput(
                "min_gate_samples must be at least 1".to_string(),
            ));
        }
        if self.min_effective_samples < 1 {
            return Err(Error::InvalidInput(
                "min_effective_samples must be at least 1".to_string(),
            ));
        }
        if self.violation_demote_threshold < 1 {
            return Err(Error::InvalidInput(
                "violation_demote_threshold must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("cluster_epsilon_m", self.cluster_epsilon_m),
            ("max_spatial_variance_m", self.max_spatial_variance_m),
            ("merge_distance_m", self.merge_distance_m),
            ("orphan_max_distance_m", self.orphan_max_distance_m),
            ("gate_radius_m", self.gate_radius_m),
            ("out_of_range_factor", self.out_of_range_factor),
        ] {
            if value <= 0.0 {
                return Err(Error::InvalidInput(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.merge_suggest_confidence > self.merge_auto_confidence {
            return Err(Error::InvalidInput(format!(
                "merge_suggest_confidence ({}) must not exceed merge_auto_confidence ({})",
                self.merge_suggest_confidence, self.merge_auto_confidence
            )));
        }
        Ok(())
    }

    /// Load the config for a session, falling back to defaults when unset
    pub async fn load(pool: &SqlitePool, session_guid: &str) -> Result<ThresholdConfig> {
        let row = sqlx::query_as::<_, ThresholdConfig>(
            r#"
            SELECT min_gate_samples, max_spatial_variance_m, cluster_epsilon_m,
                   min_quality_weight, soft_confidence, hard_confidence,
                   min_effective_samples, violation_demote_threshold, learning_rate,
                   merge_distance_m, merge_suggest_confidence, merge_auto_confidence,
                   auto_merge_enabled, orphan_max_distance_m, gate_radius_m,
                   out_of_range_factor
            FROM threshold_config WHERE session_guid = ?
            "#,
        )
        .bind(session_guid)
        .fetch_optional(pool)
        .await?;

        Ok(row.unwrap_or_default())
    }

    /// Persist the config for a session (validated upsert)
    ///
    /// An invalid config is rejected without touching the stored row.
    pub async fn store(&self, pool: &SqlitePool, session_guid: &str) -> Result<()> {
        self.validate()?;

        sqlx::query(
            r#"
            INSERT INTO threshold_config (
                session_guid, min_gate_samples, max_spatial_variance_m,
                cluster_epsilon_m, min_quality_weight, soft_confidence,
                hard_confidence, min_effective_samples, violation_demote_threshold,
                learning_rate, merge_distance_m, merge_suggest_confidence,
                merge_auto_confidence, auto_merge_enabled, orphan_max_distance_m,
                gate_radius_m, out_of_range_factor, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(session_guid) DO UPDATE SET
                min_gate_samples = excluded.min_gate_samples,
                max_spatial_variance_m = excluded.max_spatial_variance_m,
                cluster_epsilon_m = excluded.cluster_epsilon_m,
                min_quality_weight = excluded.min_quality_weight,
                soft_confidence = excluded.soft_confidence,
                hard_confidence = excluded.hard_confidence,
                min_effective_samples = excluded.min_effective_samples,
                violation_demote_threshold = excluded.violation_demote_threshold,
                learning_rate = excluded.learning_rate,
                merge_distance_m = excluded.merge_distance_m,
                merge_suggest_confidence = excluded.merge_suggest_confidence,
                merge_auto_confidence = excluded.merge_auto_confidence,
                auto_merge_enabled = excluded.auto_merge_enabled,
                orphan_max_distance_m = excluded.orphan_max_distance_m,
                gate_radius_m = excluded.gate_radius_m,
                out_of_range_factor = excluded.out_of_range_factor,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(session_guid)
        .bind(self.min_gate_samples)
        .bind(self.max_spatial_variance_m)
        .bind(self.cluster_epsilon_m)
        .bind(self.min_quality_weight)
        .bind(self.soft_confidence)
        .bind(self.hard_confidence)
        .bind(self.min_effective_samples)
        .bind(self.violation_demote_threshold)
        .bind(self.learning_rate)
        .bind(self.merge_distance_m)
        .bind(self.merge_suggest_confidence)
        .bind(self.merge_auto_confidence)
        .bind(self.auto_merge_enabled)
        .bind(self.orphan_max_distance_m)
        .bind(self.gate_radius_m)
        .bind(self.out_of_range_factor)
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ThresholdConfig::default().validate().is_ok());
    }

    #[test]
    fn test_soft_at_or_above_hard_rejected() {
        let mut cfg = ThresholdConfig::default();
        cfg.soft_confidence = 0.80;
        cfg.hard_confidence = 0.80;
        assert!(cfg.validate().is_err());

        cfg.soft_confidence = 0.85;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let mut cfg = ThresholdConfig::default();
        cfg.hard_confidence = 1.2;
        assert!(cfg.validate().is_err());

        let mut cfg = ThresholdConfig::default();
        cfg.soft_confidence = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_nonpositive_distances_rejected() {
        let mut cfg = ThresholdConfig::default();
        cfg.cluster_epsilon_m = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = ThresholdConfig::default();
        cfg.orphan_max_distance_m = -5.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_suggest_above_auto_rejected() {
        let mut cfg = ThresholdConfig::default();
        cfg.merge_suggest_confidence = 0.95;
        cfg.merge_auto_confidence = 0.90;
        assert!(cfg.validate().is_err());
    }

    #[tokio::test]
    async fn test_store_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = crate::db::init_database(&dir.path().join("gatewise.db"))
            .await
            .unwrap();

        // Unconfigured session reads back defaults
        let loaded = ThresholdConfig::load(&pool, "session-1").await.unwrap();
        assert_eq!(loaded, ThresholdConfig::default());

        let mut cfg = ThresholdConfig::default();
        cfg.min_gate_samples = 5;
        cfg.auto_merge_enabled = true;
        cfg.store(&pool, "session-1").await.unwrap();

        let loaded = ThresholdConfig::load(&pool, "session-1").await.unwrap();
        assert_eq!(loaded, cfg);

        // Another session is unaffected
        let other = ThresholdConfig::load(&pool, "session-2").await.unwrap();
        assert_eq!(other, ThresholdConfig::default());

        // An invalid write is rejected and leaves the stored row alone
        let mut bad = cfg.clone();
        bad.soft_confidence = 0.95;
        assert!(bad.store(&pool, "session-1").await.is_err());
        let after = ThresholdConfig::load(&pool, "session-1").await.unwrap();
        assert_eq!(after, cfg);
    }
}
