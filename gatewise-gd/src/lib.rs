//! gatewise-gd library interface
//!
//! Exposes the gate discovery engine, HTTP boundaries, and application
//! state for the binary and for integration testing.

pub mod api;
pub mod error;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use gatewise_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use workflow::{CycleRegistry, CycleRunner};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Per-session cycle locks and cancellation tokens
    pub registry: Arc<CycleRegistry>,
    /// Background cycle orchestrator
    pub cycle_runner: CycleRunner,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        let registry = Arc::new(CycleRegistry::new());
        let cycle_runner = CycleRunner::new(db.clone(), event_bus.clone(), registry.clone());
        Self {
            db,
            event_bus,
            registry,
            cycle_runner,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::checkin_routes())
        .merge(api::validation_routes())
        .merge(api::session_routes())
        .merge(api::gate_routes())
        .merge(api::merge_routes())
        .merge(api::config_routes())
        .merge(api::cycle_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}
