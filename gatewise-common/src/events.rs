//! Event types for the gatewise event system
//!
//! Provides shared event definitions and the EventBus used to broadcast
//! discovery/enforcement outcomes to SSE subscribers and other listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Gatewise event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// The synchronous validation path does not emit events; everything here
/// comes from ingestion or the background cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewiseEvent {
    /// A scan event was recorded at the ingestion boundary
    CheckinRecorded {
        event_guid: String,
        session_guid: String,
        category: String,
        /// Gate resolved at ingestion time, if any
        gate_guid: Option<String>,
        quality_weight: f64,
        timestamp: DateTime<Utc>,
    },

    /// The materializer created a new gate from a cluster
    GateCreated {
        gate_guid: String,
        session_guid: String,
        name: String,
        latitude: f64,
        longitude: f64,
        sample_count: i64,
        health_score: f64,
        timestamp: DateTime<Utc>,
    },

    /// An existing gate absorbed a new cluster (centroid/health refresh)
    GateUpdated {
        gate_guid: String,
        session_guid: String,
        sample_count: i64,
        health_score: f64,
        timestamp: DateTime<Utc>,
    },

    /// A source gate was merged into a target gate and deactivated
    GateMerged {
        session_guid: String,
        source_gate_guid: String,
        target_gate_guid: String,
        timestamp: DateTime<Utc>,
    },

    /// A category binding crossed the enforcement thresholds
    BindingPromoted {
        gate_guid: String,
        category: String,
        confidence: f64,
        sample_count: i64,
        timestamp: DateTime<Utc>,
    },

    /// A binding was demoted after sustained violations
    BindingDemoted {
        gate_guid: String,
        category: String,
        /// "probation" or "unbound"
        new_status: String,
        violation_count: i64,
        timestamp: DateTime<Utc>,
    },

    /// The duplicate detector proposed (or auto-applied) a merge
    MergeSuggested {
        suggestion_guid: String,
        session_guid: String,
        source_gate_guid: String,
        target_gate_guid: String,
        confidence: f64,
        auto_applied: bool,
        timestamp: DateTime<Utc>,
    },

    /// A discovery cycle finished for a session
    DiscoveryCycleCompleted {
        session_guid: String,
        scans_considered: usize,
        clusters_found: usize,
        gates_created: usize,
        gates_updated: usize,
        orphans_assigned: usize,
        timestamp: DateTime<Utc>,
    },

    /// An enforcement cycle finished for a session
    EnforcementCycleCompleted {
        session_guid: String,
        events_learned: usize,
        violations_recorded: usize,
        suggestions_created: usize,
        timestamp: DateTime<Utc>,
    },
}

impl GatewiseEvent {
    /// Event name used as the SSE event type
    pub fn event_name(&self) -> &'static str {
        match self {
            GatewiseEvent::CheckinRecorded { .. } => "CheckinRecorded",
            GatewiseEvent::GateCreated { .. } => "GateCreated",
            GatewiseEvent::GateUpdated { .. } => "GateUpdated",
            GatewiseEvent::GateMerged { .. } => "GateMerged",
            GatewiseEvent::BindingPromoted { .. } => "BindingPromoted",
            GatewiseEvent::BindingDemoted { .. } => "BindingDemoted",
            GatewiseEvent::MergeSuggested { .. } => "MergeSuggested",
            GatewiseEvent::DiscoveryCycleCompleted { .. } => "DiscoveryCycleCompleted",
            GatewiseEvent::EnforcementCycleCompleted { .. } => "EnforcementCycleCompleted",
        }
    }
}

/// Broadcast bus for gatewise events
///
/// Thin wrapper over `tokio::sync::broadcast`: multiple producers, every
/// subscriber sees every event after its subscription, slow subscribers
/// lose oldest events once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GatewiseEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<GatewiseEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Dropped silently when no subscriber is listening; emission is
    /// observability, never control flow.
    pub fn emit(&self, event: GatewiseEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of currently attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
