//! Geographic primitives
//!
//! Great-circle math used by scan clustering, gate centroid maintenance,
//! orphan assignment, and the duplicate detector. All distances are in
//! meters; coordinates are WGS84 degrees.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters (IUGG mean radius)
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS84 coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle (haversine) distance to another point, in meters
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_M * c
    }
}

/// Arithmetic mean of a set of points
///
/// Adequate at venue scale (hundreds of meters). Does not handle clusters
/// spanning the antimeridian.
pub fn centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as f64;
    let lat = points.iter().map(|p| p.latitude).sum::<f64>() / n;
    let lon = points.iter().map(|p| p.longitude).sum::<f64>() / n;

    Some(GeoPoint::new(lat, lon))
}

/// Mean great-circle distance of points from their centroid, in meters
pub fn spatial_variance_m(points: &[GeoPoint], centroid: &GeoPoint) -> f64 {
    if points.is_empty() {
        return 0.0;
    }

    points.iter().map(|p| p.distance_m(centroid)).sum::<f64>() / points.len() as f64
}

/// Sample-weighted average of two centroids
///
/// Used when a new cluster refines an existing gate: the gate keeps a
/// rolling centroid weighted by how many samples each side contributed.
pub fn weighted_centroid(a: &GeoPoint, weight_a: f64, b: &GeoPoint, weight_b: f64) -> GeoPoint {
    let total = weight_a + weight_b;
    if total <= 0.0 {
        return *a;
    }

    GeoPoint::new(
        (a.latitude * weight_a + b.latitude * weight_b) / total,
        (a.longitude * weight_a + b.longitude * weight_b) / total,
    )
}
