//! Completion notifications
//!
//! The worker publishes through `NotificationSink` only after the node's
//! completion has committed. The production sink forwards to the EventBus,
//! which feeds SSE subscribers.

use chrono::Utc;
use mutr_common::events::{EventBus, MutrEvent};
use tracing::{debug, trace};

use crate::models::Node;

/// Receiver of analysis outcomes
pub trait NotificationSink: Send + Sync {
    /// A node's analysis completed and committed
    fn publish(&self, channel: &str, node: &Node);

    /// A node's analysis exhausted its attempts
    fn publish_failure(&self, _node_id: i64, _error: &str) {}
}

/// Sink backed by the service EventBus
pub struct EventBusSink {
    event_bus: EventBus,
}

impl EventBusSink {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

impl NotificationSink for EventBusSink {
    fn publish(&self, channel: &str, node: &Node) {
        let event = MutrEvent::NodeAnalyzed {
            channel: channel.to_string(),
            node: node.to_info(),
            timestamp: Utc::now(),
        };
        match self.event_bus.emit(event) {
            Ok(receivers) => debug!(node_id = node.id, channel, receivers, "Published analyzed node"),
            Err(_) => trace!(node_id = node.id, channel, "No subscribers for analyzed node"),
        }
    }

    fn publish_failure(&self, node_id: i64, error: &str) {
        self.event_bus.emit_lossy(MutrEvent::NodeAnalysisFailed {
            node_id,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisStatus, Emotion, MutationFilter};

    fn analyzed_node() -> Node {
        let now = Utc::now();
        Node {
            id: 7,
            parent_id: Some(3),
            root_id: 3,
            content: "tide".to_string(),
            topic: Some("sea".to_string()),
            mutation_filter: MutationFilter::Evolution,
            mutation_score: 0.5,
            emotion: Emotion::Joy,
            confidence: Some(0.8),
            analysis_status: AnalysisStatus::Completed,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let sink = EventBusSink::new(bus.clone());

        sink.publish("/topic/galaxy/public", &analyzed_node());

        match rx.recv().await.unwrap() {
            MutrEvent::NodeAnalyzed { channel, node, .. } => {
                assert_eq!(channel, "/topic/galaxy/public");
                assert_eq!(node.id, 7);
                assert_eq!(node.root_id, 3);
            }
            other => panic!("expected NodeAnalyzed, got {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_quiet() {
        let sink = EventBusSink::new(EventBus::new(8));
        sink.publish("/topic/galaxy/public", &analyzed_node());
        sink.publish_failure(7, "model unavailable");
    }
}
