//! Node endpoints
//!
//! - `POST /api/v1/nodes` create a node and queue its analysis
//! - `GET /api/v1/nodes/:id` fetch one node
//! - `GET /api/v1/galaxies/:root_id` fetch a whole lineage
//! - `POST /api/v1/nodes/:id/retry` re-run a FAILED or COMPLETED analysis

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::models::Node;
use crate::{ApiError, ApiResult, AppState};

/// POST /api/v1/nodes body
#[derive(Debug, Deserialize)]
pub struct CreateNodeRequest {
    /// Parent node; omit to start a new galaxy
    pub parent_id: Option<i64>,
    pub content: String,
}

/// GET /api/v1/galaxies/:root_id query
#[derive(Debug, Default, Deserialize)]
pub struct GalaxyQuery {
    /// Only nodes whose content contains this text
    pub keyword: Option<String>,
}

/// GET /api/v1/galaxies/:root_id response
#[derive(Debug, Serialize)]
pub struct GalaxyResponse {
    pub root_id: i64,
    pub nodes: Vec<Node>,
}

/// POST /api/v1/nodes
pub async fn create_node(
    State(state): State<AppState>,
    Json(request): Json<CreateNodeRequest>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    if request.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be blank".to_string()));
    }

    let node = state
        .node_service
        .create_node(request.parent_id, &request.content)
        .await?;

    Ok((StatusCode::CREATED, Json(node)))
}

/// GET /api/v1/nodes/:id
pub async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<i64>,
) -> ApiResult<Json<Node>> {
    Ok(Json(state.node_service.get_node(node_id).await?))
}

/// GET /api/v1/galaxies/:root_id
pub async fn get_galaxy(
    State(state): State<AppState>,
    Path(root_id): Path<i64>,
    Query(query): Query<GalaxyQuery>,
) -> ApiResult<Json<GalaxyResponse>> {
    let nodes = state
        .node_service
        .lineage(root_id, query.keyword.as_deref())
        .await?;
    Ok(Json(GalaxyResponse { root_id, nodes }))
}

/// POST /api/v1/nodes/:id/retry
pub async fn retry_node(
    State(state): State<AppState>,
    Path(node_id): Path<i64>,
) -> ApiResult<Json<Node>> {
    match state.node_service.retry(node_id).await {
        Ok(node) => Ok(Json(node)),
        Err(mutr_common::Error::InvalidState(_)) => Err(ApiError::Conflict(format!(
            "Node {} is not FAILED or COMPLETED",
            node_id
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Build node routes
pub fn node_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/nodes", post(create_node))
        .route("/api/v1/nodes/:id", get(get_node))
        .route("/api/v1/nodes/:id/retry", post(retry_node))
        .route("/api/v1/galaxies/:root_id", get(get_galaxy))
}
