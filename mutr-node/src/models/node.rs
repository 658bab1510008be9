//! Lineage node model
//!
//! A node's analysis status moves PENDING → PROCESSING → {COMPLETED, FAILED};
//! an explicit retry moves FAILED or COMPLETED back to PENDING.

use chrono::{DateTime, Utc};
use mutr_common::events::NodeInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lower bound of the EVOLUTION tier
pub const EVOLUTION_THRESHOLD: f64 = 0.25;
/// Lower bound of the MUTATION tier
pub const MUTATION_THRESHOLD: f64 = 0.70;

/// Analysis lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisStatus {
    /// Waiting for (or held before) classification
    Pending,
    /// Engine call in progress
    Processing,
    /// Classification applied
    Completed,
    /// Engine attempts exhausted; `last_error` holds the cause
    Failed,
}

impl AnalysisStatus {
    /// States the recovery scanner re-submits, in scan order
    pub const UNFINISHED: [AnalysisStatus; 3] = [
        AnalysisStatus::Pending,
        AnalysisStatus::Processing,
        AnalysisStatus::Failed,
    ];

    /// States an explicit retry may leave
    pub const RETRYABLE: [AnalysisStatus; 2] = [AnalysisStatus::Failed, AnalysisStatus::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "PENDING",
            AnalysisStatus::Processing => "PROCESSING",
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(AnalysisStatus::Pending),
            "PROCESSING" => Ok(AnalysisStatus::Processing),
            "COMPLETED" => Ok(AnalysisStatus::Completed),
            "FAILED" => Ok(AnalysisStatus::Failed),
            other => Err(format!("unknown analysis status '{}'", other)),
        }
    }
}

/// Tier a node's mutation score falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationFilter {
    /// Not yet classified, or a lineage root
    Origin,
    /// Stays close to the lineage
    Cluster,
    /// Noticeable drift
    Evolution,
    /// Breaks away from the lineage
    Mutation,
}

impl MutationFilter {
    /// Bucket a score: `< 0.25` CLUSTER, `< 0.70` EVOLUTION, otherwise MUTATION
    pub fn from_score(score: f64) -> Self {
        if score < EVOLUTION_THRESHOLD {
            MutationFilter::Cluster
        } else if score < MUTATION_THRESHOLD {
            MutationFilter::Evolution
        } else {
            MutationFilter::Mutation
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationFilter::Origin => "ORIGIN",
            MutationFilter::Cluster => "CLUSTER",
            MutationFilter::Evolution => "EVOLUTION",
            MutationFilter::Mutation => "MUTATION",
        }
    }

    /// Parse a stored value; unknown values read as ORIGIN
    pub fn parse(s: &str) -> Self {
        match s {
            "CLUSTER" => MutationFilter::Cluster,
            "EVOLUTION" => MutationFilter::Evolution,
            "MUTATION" => MutationFilter::Mutation,
            _ => MutationFilter::Origin,
        }
    }
}

/// Emotion label attached by the classification engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Joy,
    #[default]
    Neutral,
    Sadness,
    Anger,
    Anxiety,
    Embarrassed,
    Hurt,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Joy => "joy",
            Emotion::Neutral => "neutral",
            Emotion::Sadness => "sadness",
            Emotion::Anger => "anger",
            Emotion::Anxiety => "anxiety",
            Emotion::Embarrassed => "embarrassed",
            Emotion::Hurt => "hurt",
        }
    }

    /// Case-insensitive parse; anything unrecognized is neutral
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "joy" => Emotion::Joy,
            "sadness" => Emotion::Sadness,
            "anger" => Emotion::Anger,
            "anxiety" => Emotion::Anxiety,
            "embarrassed" => Emotion::Embarrassed,
            "hurt" => Emotion::Hurt,
            _ => Emotion::Neutral,
        }
    }
}

/// A unit of authored content and its analysis outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub parent_id: Option<i64>,
    /// Own id for roots, otherwise the parent's root
    pub root_id: i64,
    pub content: String,
    pub topic: Option<String>,
    pub mutation_filter: MutationFilter,
    pub mutation_score: f64,
    pub emotion: Emotion,
    pub confidence: Option<f64>,
    pub analysis_status: AnalysisStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Snapshot carried by node events
    pub fn to_info(&self) -> NodeInfo {
        NodeInfo {
            id: self.id,
            parent_id: self.parent_id,
            root_id: self.root_id,
            content: self.content.clone(),
            topic: self.topic.clone(),
            mutation_filter: self.mutation_filter.as_str().to_string(),
            mutation_score: self.mutation_score,
            emotion: self.emotion.as_str().to_string(),
            confidence: self.confidence,
            analysis_status: self.analysis_status.as_str().to_string(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_filter_thresholds() {
        assert_eq!(MutationFilter::from_score(0.0), MutationFilter::Cluster);
        assert_eq!(MutationFilter::from_score(0.24), MutationFilter::Cluster);
        assert_eq!(MutationFilter::from_score(0.25), MutationFilter::Evolution);
        assert_eq!(MutationFilter::from_score(0.69), MutationFilter::Evolution);
        assert_eq!(MutationFilter::from_score(0.70), MutationFilter::Mutation);
        assert_eq!(MutationFilter::from_score(1.0), MutationFilter::Mutation);
    }

    #[test]
    fn test_emotion_parse_is_lenient() {
        assert_eq!(Emotion::parse("JOY"), Emotion::Joy);
        assert_eq!(Emotion::parse(" Hurt "), Emotion::Hurt);
        assert_eq!(Emotion::parse("embarrassed"), Emotion::Embarrassed);
        assert_eq!(Emotion::parse("ecstatic"), Emotion::Neutral);
        assert_eq!(Emotion::parse(""), Emotion::Neutral);
    }

    #[test]
    fn test_status_round_trip_through_storage_form() {
        for status in [
            AnalysisStatus::Pending,
            AnalysisStatus::Processing,
            AnalysisStatus::Completed,
            AnalysisStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<AnalysisStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn test_retryable_and_unfinished_states() {
        assert_eq!(
            AnalysisStatus::RETRYABLE,
            [AnalysisStatus::Failed, AnalysisStatus::Completed]
        );
        assert!(!AnalysisStatus::UNFINISHED.contains(&AnalysisStatus::Completed));
        assert!(AnalysisStatus::UNFINISHED.contains(&AnalysisStatus::Failed));
        assert!(AnalysisStatus::UNFINISHED.contains(&AnalysisStatus::Processing));
    }

    #[test]
    fn test_to_info_uses_wire_names() {
        let now = Utc::now();
        let node = Node {
            id: 2,
            parent_id: Some(1),
            root_id: 1,
            content: "a reply".to_string(),
            topic: Some("travel".to_string()),
            mutation_filter: MutationFilter::Evolution,
            mutation_score: 0.4,
            emotion: Emotion::Anxiety,
            confidence: Some(0.7),
            analysis_status: AnalysisStatus::Completed,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        let info = node.to_info();
        assert_eq!(info.mutation_filter, "EVOLUTION");
        assert_eq!(info.emotion, "anxiety");
        assert_eq!(info.analysis_status, "COMPLETED");
        assert_eq!(info.root_id, 1);
        assert_eq!(info.parent_id, Some(1));
    }
}
