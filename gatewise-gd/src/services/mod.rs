//! Gate discovery and enforcement engine components
//!
//! Each service is a single-purpose unit: the quality filter scores scan
//! GPS accuracy, the clustering engine groups accepted scans, the
//! materializer reconciles clusters into gates, the orphan assigner
//! backfills ungated scans, the binding learner drives the category
//! state machine, the duplicate detector proposes merges, the merge
//! executor applies them atomically, and the validation service answers
//! the synchronous check-in decision.

pub mod binding_learner;
pub mod clustering;
pub mod duplicate_detector;
pub mod materializer;
pub mod merge_executor;
pub mod orphan_assigner;
pub mod quality_filter;
pub mod validation;

pub use binding_learner::{BindingLearner, LearnOutcome};
pub use clustering::{cluster_scans, Cluster, ScanPoint};
pub use duplicate_detector::{detect_duplicates, DetectOutcome};
pub use materializer::{materialize_clusters, MaterializeOutcome};
pub use merge_executor::{apply_merge, reject_suggestion};
pub use orphan_assigner::assign_orphans;
pub use quality_filter::quality_weight;
pub use validation::{validate_checkin, ValidationDecision, ValidationOutcome};
