//! Classification engine client
//!
//! The engine is a remote AI service speaking JSON over HTTP:
//! - `POST {base}/analyze` with a `ClassificationInput`, answers an `AnalysisResult`
//! - `GET {base}/health` answers `{"status": "SERVING" | "NOT_SERVING"}`
//!
//! The worker talks to it through the `ClassificationEngine` trait so tests
//! can substitute a stub.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::{AnalysisResult, ClassificationInput};

const USER_AGENT: &str = concat!("mutr-node/", env!("CARGO_PKG_VERSION"));

/// Engine client errors
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Engine call timed out after {0} ms")]
    Timeout(u64),

    #[error("Engine returned {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unusable result: {0}")]
    Unusable(String),
}

/// Engine serving status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServingStatus {
    Serving,
    NotServing,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: ServingStatus,
}

/// Remote classifier used by the analysis worker
#[async_trait]
pub trait ClassificationEngine: Send + Sync {
    /// Classify one node
    async fn analyze(&self, input: &ClassificationInput) -> Result<AnalysisResult, EngineError>;

    /// Report whether the engine is ready to serve
    async fn health(&self) -> Result<ServingStatus, EngineError>;
}

/// Reject results the node store cannot apply
pub fn validate_result(result: AnalysisResult) -> Result<AnalysisResult, EngineError> {
    if result.topic.trim().is_empty() {
        return Err(EngineError::Unusable("blank topic".to_string()));
    }
    if !result.mutation_score.is_finite() || !(0.0..=1.0).contains(&result.mutation_score) {
        return Err(EngineError::Unusable(format!(
            "mutation_score {} outside 0.0..=1.0",
            result.mutation_score
        )));
    }
    if !result.confidence.is_finite() || !(0.0..=1.0).contains(&result.confidence) {
        return Err(EngineError::Unusable(format!(
            "confidence {} outside 0.0..=1.0",
            result.confidence
        )));
    }
    Ok(result)
}

/// HTTP/JSON engine client
pub struct HttpClassificationEngine {
    http_client: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
}

impl HttpClassificationEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, err: reqwest::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::Timeout(self.timeout_ms)
        } else {
            EngineError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl ClassificationEngine for HttpClassificationEngine {
    async fn analyze(&self, input: &ClassificationInput) -> Result<AnalysisResult, EngineError> {
        let url = format!("{}/analyze", self.base_url);

        tracing::debug!(
            content_len = input.content.len(),
            context_len = input.full_context.len(),
            "Querying classification engine"
        );

        let response = self
            .http_client
            .post(&url)
            .json(input)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngineError::Api(status.as_u16(), error_text));
        }

        let result: AnalysisResult = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))?;

        validate_result(result)
    }

    async fn health(&self) -> Result<ServingStatus, EngineError> {
        let url = format!("{}/health", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Api(status.as_u16(), "health check failed".to_string()));
        }

        let health: HealthResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))?;

        Ok(health.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(topic: &str, confidence: f64, score: f64) -> AnalysisResult {
        AnalysisResult {
            topic: topic.to_string(),
            emotion: "joy".to_string(),
            confidence,
            mutation_score: score,
        }
    }

    #[test]
    fn test_client_creation_trims_base_url() {
        let client =
            HttpClassificationEngine::new("http://localhost:9090/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:9090");
    }

    #[test]
    fn test_validate_accepts_in_range_result() {
        assert!(validate_result(result("weather", 0.9, 0.3)).is_ok());
        assert!(validate_result(result("weather", 0.0, 1.0)).is_ok());
    }

    #[test]
    fn test_validate_rejects_unusable_results() {
        assert!(matches!(
            validate_result(result("  ", 0.9, 0.3)),
            Err(EngineError::Unusable(_))
        ));
        assert!(matches!(
            validate_result(result("t", 0.9, f64::NAN)),
            Err(EngineError::Unusable(_))
        ));
        assert!(matches!(
            validate_result(result("t", 0.9, 1.5)),
            Err(EngineError::Unusable(_))
        ));
        assert!(matches!(
            validate_result(result("t", -0.1, 0.5)),
            Err(EngineError::Unusable(_))
        ));
    }

    #[test]
    fn test_serving_status_wire_names() {
        let health: HealthResponse = serde_json::from_str(r#"{"status":"NOT_SERVING"}"#).unwrap();
        assert_eq!(health.status, ServingStatus::NotServing);

        let health: HealthResponse = serde_json::from_str(r#"{"status":"SERVICE_UNKNOWN"}"#).unwrap();
        assert_eq!(health.status, ServingStatus::Unknown);
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_network_error() {
        // Port 9 (discard) is closed on test machines
        let client =
            HttpClassificationEngine::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.health().await.unwrap_err();
        assert!(matches!(err, EngineError::Network(_) | EngineError::Timeout(_)));
    }
}
