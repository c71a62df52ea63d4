//! Server-Sent Events (SSE) for resolution progress streaming

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

/// GET /events query parameters
#[derive(Debug, Default, Deserialize)]
pub struct EventStreamQuery {
    /// Only forward lifecycle events of this project (row changes always pass)
    pub project_id: Option<Uuid>,
}

/// GET /events - SSE stream of FlyerEvents
///
/// Streams `RowChanged` for every persisted write plus project lifecycle
/// events (ProjectProcessingStarted, ProjectProgress, ProjectCompleted,
/// ProjectFailed, ProjectCancelled).
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let wanted = query.project_id;
    flyer_common::sse::create_event_sse_stream("flyer-resolver", &state.event_bus, move |event| {
        match (wanted, event.project_id()) {
            (Some(wanted), Some(project_id)) => wanted == project_id,
            _ => true,
        }
    })
}
