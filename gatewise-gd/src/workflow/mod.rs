//! Background cycle orchestration
//!
//! Discovery cycles (clustering → materialization → orphan backfill) and
//! enforcement cycles (binding learning → duplicate detection) run
//! asynchronously, serialized per venue session, checkpointed, and
//! cancellable when a session is deactivated. The synchronous validation
//! path never waits on anything here.

pub mod cycle;
pub mod registry;

pub use cycle::{CycleOutcome, CycleRunner, DiscoverySummary, EnforcementSummary};
pub use registry::CycleRegistry;
