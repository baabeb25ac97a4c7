//! Validation Service
//!
//! The only synchronous, latency-sensitive operation: given a prospective
//! check-in (gate, category, optional location), answer allow /
//! flag-mismatch / deny-out-of-range from current bindings and
//! thresholds. Read-only; never blocks on clustering or merge work.

use gatewise_common::db::models::{BindingStatus, Gate, GateStatus};
use gatewise_common::geo::GeoPoint;
use gatewise_common::{Result, ThresholdConfig};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

/// Check-in validation decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationDecision {
    /// Category is bound here, or there is insufficient evidence to flag
    Allow,
    /// Gate enforces a different category and has none for this one
    FlagMismatch,
    /// Gate unusable (inactive/unknown) or scan location far outside the
    /// gate's accepted radius
    DenyOutOfRange,
}

impl ValidationDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationDecision::Allow => "allow",
            ValidationDecision::FlagMismatch => "flag_mismatch",
            ValidationDecision::DenyOutOfRange => "deny_out_of_range",
        }
    }
}

/// Decision plus the observability fields the scanning app reports
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub decision: ValidationDecision,
    /// Confidence of this category's binding at the gate, when one exists
    pub confidence: Option<f64>,
    pub binding_status: Option<BindingStatus>,
}

/// Validate a prospective check-in against current bindings
///
/// Deterministic: identical (gate, category, bindings, thresholds) yield
/// the identical decision on every call.
pub async fn validate_checkin(
    pool: &SqlitePool,
    session_guid: &str,
    gate_guid: &str,
    category: &str,
    location: Option<GeoPoint>,
    config: &ThresholdConfig,
) -> Result<ValidationOutcome> {
    let gate = sqlx::query_as::<_, Gate>(
        "SELECT * FROM gates WHERE guid = ? AND session_guid = ?",
    )
    .bind(gate_guid)
    .bind(session_guid)
    .fetch_optional(pool)
    .await?;

    let gate = match gate {
        Some(g) => g,
        None => {
            return Ok(ValidationOutcome {
                decision: ValidationDecision::DenyOutOfRange,
                confidence: None,
                binding_status: None,
            })
        }
    };

    if gate.status != GateStatus::Active {
        return Ok(ValidationOutcome {
            decision: ValidationDecision::DenyOutOfRange,
            confidence: None,
            binding_status: None,
        });
    }

    // Location sanity: deny only when the scan is a wide margin outside
    // the gate's accepted radius, so ordinary GPS noise never denies.
    if let Some(point) = location {
        let distance = point.distance_m(&GeoPoint::new(gate.latitude, gate.longitude));
        let limit = config.gate_radius_m * config.out_of_range_factor;
        if distance > limit {
            debug!(
                gate = %gate_guid,
                distance_m = distance,
                limit_m = limit,
                "Check-in location far outside gate radius"
            );
            return Ok(ValidationOutcome {
                decision: ValidationDecision::DenyOutOfRange,
                confidence: None,
                binding_status: None,
            });
        }
    }

    let binding = sqlx::query_as::<_, (f64, BindingStatus)>(
        "SELECT confidence, status FROM category_bindings \
         WHERE gate_guid = ? AND category = ?",
    )
    .bind(gate_guid)
    .bind(category)
    .fetch_optional(pool)
    .await?;

    match binding {
        Some((confidence, status)) if status != BindingStatus::Unbound => Ok(ValidationOutcome {
            decision: ValidationDecision::Allow,
            confidence: Some(confidence),
            binding_status: Some(status),
        }),
        other => {
            // No usable binding for this category. Flag only when the
            // gate actively enforces a different category; otherwise
            // there is not enough evidence to do more than allow.
            let enforced_elsewhere: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM category_bindings \
                 WHERE gate_guid = ? AND status = 'enforced' AND category != ?",
            )
            .bind(gate_guid)
            .bind(category)
            .fetch_one(pool)
            .await?;

            let decision = if enforced_elsewhere > 0 {
                ValidationDecision::FlagMismatch
            } else {
                ValidationDecision::Allow
            };

            Ok(ValidationOutcome {
                decision,
                confidence: other.as_ref().map(|(c, _)| *c),
                binding_status: other.map(|(_, s)| s),
            })
        }
    }
}
