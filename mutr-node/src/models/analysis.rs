//! Analysis job and engine result records

use serde::{Deserialize, Serialize};

/// One pending classification job for a node
///
/// Serialized as JSON while held in the waiting table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub node_id: i64,
    pub parent_id: Option<i64>,
    pub content: String,
    /// Parent topic known at request time; blank or None means "look it up"
    pub parent_topic_hint: Option<String>,
    /// Topic of the ancestor at the context window boundary
    pub baseline_topic: String,
    /// Ancestor contents, oldest first
    pub full_context: String,
}

impl AnalysisRequest {
    /// Non-blank parent topic hint, if any
    pub fn topic_hint(&self) -> Option<&str> {
        self.parent_topic_hint
            .as_deref()
            .filter(|hint| !hint.trim().is_empty())
    }
}

/// Ancestor context reconstructed from the node store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisContext {
    pub full_context: String,
    pub baseline_topic: String,
}

/// Engine input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationInput {
    pub content: String,
    pub parent_topic: String,
    pub baseline_topic: String,
    pub full_context: String,
}

/// Engine output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub topic: String,
    pub emotion: String,
    pub confidence: f64,
    pub mutation_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_hint_is_ignored() {
        let mut request = AnalysisRequest {
            node_id: 1,
            parent_id: None,
            content: "hello".to_string(),
            parent_topic_hint: None,
            baseline_topic: String::new(),
            full_context: String::new(),
        };
        assert_eq!(request.topic_hint(), None);

        request.parent_topic_hint = Some("   ".to_string());
        assert_eq!(request.topic_hint(), None);

        request.parent_topic_hint = Some("weather".to_string());
        assert_eq!(request.topic_hint(), Some("weather"));
    }
}
