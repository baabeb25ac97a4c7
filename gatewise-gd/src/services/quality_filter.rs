//! GPS Quality Filter
//!
//! Scores a scan's reported GPS accuracy into a fixed quality weight.
//! The weight is stamped on the event at ingestion; scans below the
//! session's `min_quality_weight` are excluded from clustering and
//! centroid math but still stored, and still count for binding learning
//! when they already carry a resolved gate.

/// Map reported accuracy radius (meters) to a quality weight
///
/// Fixed accuracy bands:
/// - ≤10m  → 1.0
/// - ≤20m  → 0.9
/// - ≤30m  → 0.8
/// - ≤50m  → 0.6
/// - >50m  → 0.4
/// - missing location → 0.0
pub fn quality_weight(accuracy_m: Option<f64>) -> f64 {
    match accuracy_m {
        None => 0.0,
        Some(acc) if !acc.is_finite() || acc < 0.0 => 0.0,
        Some(acc) if acc <= 10.0 => 1.0,
        Some(acc) if acc <= 20.0 => 0.9,
        Some(acc) if acc <= 30.0 => 0.8,
        Some(acc) if acc <= 50.0 => 0.6,
        Some(_) => 0.4,
    }
}

/// Whether a weight passes the clustering acceptance bar
pub fn accepts(weight: f64, min_quality_weight: f64) -> bool {
    weight >= min_quality_weight
}
