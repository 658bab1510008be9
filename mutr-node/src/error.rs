//! Error types for mutr-node
//!
//! `ApiError` is what HTTP handlers return; `AnalysisError` classifies
//! failures inside the analysis pipeline so each kind is logged distinctly.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::classification_client::EngineError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. retrying a node that is still being analyzed
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Analysis queue is closed or full (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// mutr-common error
    #[error("Common error: {0}")]
    Common(#[from] mutr_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg)
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Common(ref err) => match err {
                mutr_common::Error::NotFound(msg) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
                }
                mutr_common::Error::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
                }
                mutr_common::Error::InvalidState(msg) => {
                    (StatusCode::CONFLICT, "CONFLICT", msg.clone())
                }
                other => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    other.to_string(),
                ),
            },
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Failure inside the analysis pipeline
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Referenced node or parent does not exist
    #[error("Node {0} not found")]
    NotFound(i64),

    /// Status transition attempted from the wrong state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Engine call failed, timed out or returned an unusable result
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Readiness or waiting store operation failed
    #[error("Coordination error: {0}")]
    Coordination(mutr_common::Error),

    /// Node store operation failed
    #[error("Node store error: {0}")]
    Store(mutr_common::Error),
}

impl From<mutr_common::Error> for AnalysisError {
    fn from(err: mutr_common::Error) -> Self {
        match err {
            mutr_common::Error::InvalidState(msg) => AnalysisError::InvalidState(msg),
            other => AnalysisError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_not_found_maps_to_404() {
        let response = ApiError::NotFound("node 9".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "node 9");
    }

    #[tokio::test]
    async fn test_common_invalid_state_maps_to_409() {
        let err = ApiError::from(mutr_common::Error::InvalidState("busy".to_string()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_invalid_state_is_not_a_store_error() {
        let err = AnalysisError::from(mutr_common::Error::InvalidState("x".to_string()));
        assert!(matches!(err, AnalysisError::InvalidState(_)));

        let err = AnalysisError::from(mutr_common::Error::Internal("x".to_string()));
        assert!(matches!(err, AnalysisError::Store(_)));
    }
}
