//! Database models
//!
//! Row structs and status enums for the gatewise schema. Guids are stored
//! as TEXT (hyphenated UUIDv4); timestamps as UTC. Status enums map to
//! lowercase TEXT columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A venue session (one event day/run at a venue)
///
/// Background cycles only schedule for active sessions; marking a session
/// inactive cancels its in-flight cycle after the current unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VenueSession {
    pub guid: String,
    pub name: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Inactive,
}

/// An append-only wristband scan event
///
/// `id` is the monotonic checkpoint cursor; `guid` is the external
/// identifier. The only post-insert mutation is one-time gate resolution
/// (orphan backfill).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CheckinEvent {
    pub id: i64,
    pub guid: String,
    pub session_guid: String,
    pub wristband_guid: String,
    pub category: String,
    pub scanned_at: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub quality_weight: f64,
    pub gate_guid: Option<String>,
    pub outcome: CheckinOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CheckinOutcome {
    Success,
    Denied,
    Error,
}

/// A physical entry point inferred from clustered scan locations
/// (or created manually by an operator)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Gate {
    pub guid: String,
    pub session_guid: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Rounded-centroid bucket, frozen at creation. UNIQUE(session, buckets)
    /// is what makes concurrent materialization collapse to one gate.
    pub lat_bucket: i64,
    pub lon_bucket: i64,
    pub derivation: GateDerivation,
    pub health_score: f64,
    pub status: GateStatus,
    pub spatial_variance_m: f64,
    pub sample_count: i64,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum GateDerivation {
    Clustered,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum GateStatus {
    Active,
    Inactive,
    Maintenance,
}

/// Learned association between a gate and a wristband category
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CategoryBinding {
    pub gate_guid: String,
    pub category: String,
    pub sample_count: i64,
    pub confidence: f64,
    pub status: BindingStatus,
    pub violation_count: i64,
    /// How many times this binding has been demoted from enforced.
    /// A second violation run after one demotion forces unbound.
    pub demotion_count: i64,
    pub last_violation_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Binding lifecycle: probation (observational) → enforced (actively used
/// to flag mismatches) → demoted back, or unbound (disabled until manual
/// reset). Transitions never skip states on the way up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BindingStatus {
    Probation,
    Enforced,
    Unbound,
}

impl BindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingStatus::Probation => "probation",
            BindingStatus::Enforced => "enforced",
            BindingStatus::Unbound => "unbound",
        }
    }
}

/// A proposed consolidation of two gates believed to be the same
/// physical location
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MergeSuggestion {
    pub guid: String,
    pub session_guid: String,
    pub source_gate_guid: String,
    pub target_gate_guid: String,
    pub distance_m: f64,
    pub traffic_similarity: f64,
    pub confidence: f64,
    pub status: SuggestionStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Rejected,
    AutoApplied,
}

/// Per-session, per-cycle-kind progress checkpoint
///
/// Background cycles resume from `last_event_id` instead of rescanning
/// history; `accepted_at_trigger` drives milestone arithmetic.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CycleCheckpoint {
    pub session_guid: String,
    pub cycle: String,
    pub last_event_id: i64,
    pub accepted_at_trigger: i64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Cycle kinds tracked in `cycle_checkpoints`
pub const CYCLE_DISCOVERY: &str = "discovery";
pub const CYCLE_ENFORCEMENT: &str = "enforcement";
