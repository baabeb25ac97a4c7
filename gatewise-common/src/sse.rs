//! Server-Sent Events (SSE) utilities
//!
//! Bridges the broadcast EventBus to an axum SSE response with heartbeat
//! keep-alive for connection status monitoring.

use crate::events::EventBus;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info};

/// Create an SSE stream that forwards all EventBus events to the client
///
/// Each GatewiseEvent becomes an SSE event named after its variant with a
/// JSON body. A lagging client skips dropped events and keeps receiving;
/// heartbeats every 15 seconds keep intermediaries from closing the
/// connection.
pub fn event_bus_sse_stream(
    bus: &EventBus,
    service_name: &'static str,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", service_name);
    let mut rx = bus.subscribe();

    let stream = async_stream::stream! {
        // Send initial connected status
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            yield Ok(Event::default().event(event.event_name()).data(json));
                        }
                        Err(e) => {
                            debug!("SSE: failed to serialize event: {}", e);
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("SSE: client lagged, {} events skipped", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    info!("SSE: {} event stream closed", service_name);
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
