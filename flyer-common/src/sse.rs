//! Server-Sent Events (SSE) utilities
//!
//! Forwards EventBus traffic to SSE clients with a periodic heartbeat.

use crate::events::{EventBus, FlyerEvent};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Create an SSE stream of FlyerEvents
///
/// `filter` decides which events are forwarded; pass `|_| true` for everything.
/// A lagging client skips the dropped events and keeps streaming.
///
/// # Example
/// ```rust,ignore
/// pub async fn event_stream(
///     State(state): State<AppState>,
/// ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
///     flyer_common::sse::create_event_sse_stream("flyer-resolver", &state.event_bus, |_| true)
/// }
/// ```
pub fn create_event_sse_stream<F>(
    service_name: &'static str,
    event_bus: &EventBus,
    filter: F,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    F: Fn(&FlyerEvent) -> bool + Send + 'static,
{
    info!("New SSE client connected to {} events", service_name);

    let mut rx = event_bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            if !filter(&event) {
                                continue;
                            }
                            let event_type = event.event_type().to_string();
                            match serde_json::to_string(&event) {
                                Ok(event_json) => {
                                    yield Ok(Event::default()
                                        .event(event_type)
                                        .data(event_json));
                                }
                                Err(e) => {
                                    warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("SSE: {} client lagged, skipped {} events", service_name, skipped);
                        }
                        Err(RecvError::Closed) => {
                            info!("SSE: {} event bus closed, ending stream", service_name);
                            break;
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
