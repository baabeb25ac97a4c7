//! SSE event stream
//!
//! Streams discovery/enforcement events (gate created, binding promoted,
//! merge suggested, cycle completed) to operator tooling.

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    gatewise_common::sse::event_bus_sse_stream(&state.event_bus, "gatewise-gd")
}
