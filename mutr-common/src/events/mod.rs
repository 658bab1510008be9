//! Event types for the MUTR event system
//!
//! Provides shared event definitions and the EventBus used to fan node
//! lifecycle events out to real-time subscribers (SSE clients).

mod node_types;

pub use node_types::NodeInfo;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Broadcast channel every completed analysis is published on
///
/// All lineages share one public channel; subscribers filter by `root_id`.
pub const PUBLIC_GALAXY_CHANNEL: &str = "/topic/galaxy/public";

/// MUTR event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MutrEvent {
    /// A node was authored and committed; its analysis is pending
    ///
    /// Triggers:
    /// - SSE: render the new node immediately, before classification
    NodeCreated {
        /// Node as stored
        node: NodeInfo,
        /// When the node was committed
        timestamp: DateTime<Utc>,
    },

    /// A node's analysis completed and was committed
    ///
    /// Emitted exactly once per completed analysis, after commit.
    ///
    /// Triggers:
    /// - SSE: update topic, emotion and mutation tier on the node
    NodeAnalyzed {
        /// Channel the notification was routed to
        channel: String,
        /// Fully classified node
        node: NodeInfo,
        /// When the analysis was committed
        timestamp: DateTime<Utc>,
    },

    /// A node's analysis exhausted its attempts and was marked FAILED
    NodeAnalysisFailed {
        /// Node identifier
        node_id: i64,
        /// Last engine error
        error: String,
        /// When the failure was recorded
        timestamp: DateTime<Utc>,
    },
}

impl MutrEvent {
    /// SSE event name
    pub fn event_type(&self) -> &str {
        match self {
            MutrEvent::NodeCreated { .. } => "NodeCreated",
            MutrEvent::NodeAnalyzed { .. } => "NodeAnalyzed",
            MutrEvent::NodeAnalysisFailed { .. } => "NodeAnalysisFailed",
        }
    }

    /// Node the event refers to
    pub fn node_id(&self) -> i64 {
        match self {
            MutrEvent::NodeCreated { node, .. } | MutrEvent::NodeAnalyzed { node, .. } => node.id,
            MutrEvent::NodeAnalysisFailed { node_id, .. } => *node_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for application-wide events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
///
/// Slow subscribers that fall more than `capacity` events behind observe
/// `RecvError::Lagged` and skip ahead.
///
/// # Examples
///
/// ```
/// use mutr_common::events::EventBus;
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
/// assert_eq!(event_bus.subscriber_count(), 1);
/// # drop(rx);
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MutrEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<MutrEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: MutrEvent,
    ) -> Result<usize, broadcast::error::SendError<MutrEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MutrEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers connected, event dropped");
        }
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
