//! Node snapshot carried by node events
//!
//! Services own their own node model; events carry this flattened,
//! serializable copy so subscribers never depend on service internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serializable view of a lineage node at the moment an event fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node identifier
    pub id: i64,
    /// Parent identifier (None for lineage roots)
    pub parent_id: Option<i64>,
    /// Identifier of the lineage root
    pub root_id: i64,
    /// Authored content
    pub content: String,
    /// Topic derived by the classification engine
    pub topic: Option<String>,
    /// Mutation tier: ORIGIN, CLUSTER, EVOLUTION or MUTATION
    pub mutation_filter: String,
    /// Drift score between the node and its lineage (0.0-1.0)
    pub mutation_score: f64,
    /// Emotion key (joy, neutral, sadness, ...)
    pub emotion: String,
    /// Engine confidence for the emotion label
    pub confidence: Option<f64>,
    /// PENDING, PROCESSING, COMPLETED or FAILED
    pub analysis_status: String,
    /// When the node was authored
    pub created_at: DateTime<Utc>,
}
