//! Server-Sent Events for node lifecycle updates
//!
//! Streams `NodeCreated`, `NodeAnalyzed` and `NodeAnalysisFailed` as they
//! happen. `?root_id=` narrows the stream to one galaxy; failure events carry
//! only a node id and are always forwarded.

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use mutr_common::events::MutrEvent;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Optional stream filter
#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    pub root_id: Option<i64>,
}

fn matches_filter(event: &MutrEvent, filter: &EventFilter) -> bool {
    match (filter.root_id, event) {
        (None, _) => true,
        (Some(root_id), MutrEvent::NodeCreated { node, .. })
        | (Some(root_id), MutrEvent::NodeAnalyzed { node, .. }) => node.root_id == root_id,
        (Some(_), MutrEvent::NodeAnalysisFailed { .. }) => true,
    }
}

/// GET /events - SSE event stream
pub async fn event_stream(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_bus.subscribe();
    info!(
        root_id = ?filter.root_id,
        subscribers = state.event_bus.subscriber_count(),
        "New SSE client connected to node events"
    );

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            tokio::select! {
                // Heartbeat every 15 seconds
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            if !matches_filter(&event, &filter) {
                                continue;
                            }
                            let event_type = event.event_type().to_string();
                            match serde_json::to_string(&event) {
                                Ok(event_json) => {
                                    debug!("SSE: Broadcasting node event: {}", event_type);
                                    yield Ok(Event::default().event(event_type).data(event_json));
                                }
                                Err(e) => {
                                    warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "SSE: Client lagging, events skipped");
                        }
                        Err(RecvError::Closed) => break,
                    }
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
