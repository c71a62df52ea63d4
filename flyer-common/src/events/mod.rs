//! Event types for the flyer event system
//!
//! Provides shared event definitions and the EventBus used to notify
//! observers of persisted changes.

mod project_types;

pub use project_types::ProjectCounters;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Flyer event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlyerEvent {
    /// A persisted row changed
    ///
    /// Emitted after every write the resolver performs, keyed by table and row id.
    /// Observers re-read the row; the event carries no row content.
    RowChanged {
        /// Table name ("projects", "products", "certified_images")
        table: String,
        /// Primary key of the changed row
        row_id: Uuid,
        /// When the write was committed
        timestamp: DateTime<Utc>,
    },

    /// Project run started
    ProjectProcessingStarted {
        project_id: Uuid,
        total_products: u32,
        timestamp: DateTime<Utc>,
    },

    /// Project counters advanced after one product finished
    ProjectProgress {
        project_id: Uuid,
        /// Product that just reached a terminal state
        product_id: Uuid,
        counters: ProjectCounters,
        /// Share of products processed so far, 0 to 100
        percentage: f64,
        timestamp: DateTime<Utc>,
    },

    /// Project run finished with at least one resolved product
    ProjectCompleted {
        project_id: Uuid,
        counters: ProjectCounters,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Project run finished with every product failed, or aborted structurally
    ProjectFailed {
        project_id: Uuid,
        counters: ProjectCounters,
        /// Structural failure reason (None when all products failed individually)
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Project run stopped at a product boundary on request
    ProjectCancelled {
        project_id: Uuid,
        counters: ProjectCounters,
        timestamp: DateTime<Utc>,
    },
}

impl FlyerEvent {
    /// Build a row change notification stamped with the current time
    pub fn row_changed(table: &str, row_id: Uuid) -> Self {
        FlyerEvent::RowChanged {
            table: table.to_string(),
            row_id,
            timestamp: Utc::now(),
        }
    }

    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            FlyerEvent::RowChanged { .. } => "RowChanged",
            FlyerEvent::ProjectProcessingStarted { .. } => "ProjectProcessingStarted",
            FlyerEvent::ProjectProgress { .. } => "ProjectProgress",
            FlyerEvent::ProjectCompleted { .. } => "ProjectCompleted",
            FlyerEvent::ProjectFailed { .. } => "ProjectFailed",
            FlyerEvent::ProjectCancelled { .. } => "ProjectCancelled",
        }
    }

    /// Project this event concerns, if any
    pub fn project_id(&self) -> Option<Uuid> {
        match self {
            FlyerEvent::RowChanged { .. } => None,
            FlyerEvent::ProjectProcessingStarted { project_id, .. }
            | FlyerEvent::ProjectProgress { project_id, .. }
            | FlyerEvent::ProjectCompleted { project_id, .. }
            | FlyerEvent::ProjectFailed { project_id, .. }
            | FlyerEvent::ProjectCancelled { project_id, .. } => Some(*project_id),
        }
    }
}

/// Broadcast bus for FlyerEvents
///
/// Cloning the bus shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FlyerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow receivers lag
    ///
    /// # Examples
    ///
    /// ```
    /// use flyer_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(1000);
    /// assert_eq!(event_bus.capacity(), 1000);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<FlyerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: FlyerEvent,
    ) -> Result<usize, broadcast::error::SendError<FlyerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Change notifications are advisory: the persisted row is the source of truth.
    pub fn emit_lossy(&self, event: FlyerEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
