//! Spatial Clustering Engine
//!
//! Groups quality-accepted scans into candidate gate clusters using
//! density-based chaining over great-circle distance: two scans belong to
//! the same cluster when one is within `cluster_epsilon_m` of *any*
//! member (transitive membership, i.e. connected components of the
//! ε-neighbor graph). A scan within epsilon of two otherwise-disjoint
//! clusters therefore joins both, merging them into one component.
//!
//! Deterministic for a fixed input set: scans are ordered by event id
//! before grouping and clusters are ordered by size (then first member)
//! in the output.

use gatewise_common::geo::{self, GeoPoint};
use gatewise_common::ThresholdConfig;
use tracing::debug;

/// A quality-accepted scan entering clustering
#[derive(Debug, Clone)]
pub struct ScanPoint {
    /// Monotonic checkin_events id, used for deterministic ordering
    pub event_id: i64,
    pub location: GeoPoint,
    pub quality_weight: f64,
}

/// A candidate gate: a dense group of scans
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Member event ids, ascending
    pub member_event_ids: Vec<i64>,
    pub centroid: GeoPoint,
    pub variance_m: f64,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.member_event_ids.len()
    }
}

/// Cluster quality-accepted scans for one venue session
///
/// Returns clusters with at least `min_gate_samples` members and spatial
/// variance within `max_spatial_variance_m`, largest first. Insufficient
/// density simply yields an empty vec; the discovery cycle treats that as
/// a no-op, not an error.
pub fn cluster_scans(scans: &[ScanPoint], config: &ThresholdConfig) -> Vec<Cluster> {
    if scans.is_empty() {
        return Vec::new();
    }

    // Deterministic input ordering
    let mut ordered: Vec<&ScanPoint> = scans.iter().collect();
    ordered.sort_by_key(|s| s.event_id);

    let n = ordered.len();
    let epsilon = config.cluster_epsilon_m;

    // Connected components over the ε-neighbor graph, BFS per component.
    // O(n²) distance checks; the discovery window is bounded upstream.
    let mut component: Vec<Option<usize>> = vec![None; n];
    let mut component_count = 0usize;

    for start in 0..n {
        if component[start].is_some() {
            continue;
        }
        let id = component_count;
        component_count += 1;

        let mut queue = vec![start];
        component[start] = Some(id);
        while let Some(i) = queue.pop() {
            for j in 0..n {
                if component[j].is_none()
                    && ordered[i].location.distance_m(&ordered[j].location) <= epsilon
                {
                    component[j] = Some(id);
                    queue.push(j);
                }
            }
        }
    }

    let mut members: Vec<Vec<&ScanPoint>> = vec![Vec::new(); component_count];
    for (idx, scan) in ordered.iter().enumerate() {
        if let Some(id) = component[idx] {
            members[id].push(*scan);
        }
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    for group in members {
        if (group.len() as i64) < config.min_gate_samples {
            continue;
        }

        let points: Vec<GeoPoint> = group.iter().map(|s| s.location).collect();
        let centroid = match geo::centroid(&points) {
            Some(c) => c,
            None => continue,
        };
        let variance_m = geo::spatial_variance_m(&points, &centroid);

        if variance_m > config.max_spatial_variance_m {
            debug!(
                members = group.len(),
                variance_m, "Discarding loose cluster (variance above threshold)"
            );
            continue;
        }

        clusters.push(Cluster {
            member_event_ids: group.iter().map(|s| s.event_id).collect(),
            centroid,
            variance_m,
        });
    }

    // Largest first; ties broken by first member id for stable output
    clusters.sort_by(|a, b| {
        b.size()
            .cmp(&a.size())
            .then_with(|| a.member_event_ids[0].cmp(&b.member_event_ids[0]))
    });

    clusters
}
