//! HTTP API boundaries
//!
//! One file per boundary: ingestion, validation, session/gate operator
//! tooling, merge review, threshold configuration, cycle triggers,
//! health, and the SSE event stream.

pub mod checkins;
pub mod config;
pub mod cycles;
pub mod gates;
pub mod health;
pub mod merges;
pub mod sessions;
pub mod sse;
pub mod validation;

pub use checkins::checkin_routes;
pub use config::config_routes;
pub use cycles::cycle_routes;
pub use gates::gate_routes;
pub use health::health_routes;
pub use merges::merge_routes;
pub use sessions::session_routes;
pub use sse::event_stream;
pub use validation::validation_routes;
