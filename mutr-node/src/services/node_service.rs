//! Node creation, lookup and retry
//!
//! Creation commits the node first and only then emits `NodeCreated` and
//! submits the analysis request, so a worker never sees an uncommitted node.

use chrono::Utc;
use mutr_common::events::{EventBus, MutrEvent};
use mutr_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::db::nodes;
use crate::models::{AnalysisRequest, AnalysisStatus, Node};
use crate::services::dispatcher::Dispatcher;

/// Build the analysis request for a stored node
///
/// The parent topic hint is the parent's topic when the parent has already
/// COMPLETED; otherwise the worker resolves it after the parent is ready.
pub async fn analysis_request_for(
    pool: &SqlitePool,
    node: &Node,
    context_cutoff_chars: usize,
) -> Result<AnalysisRequest> {
    let parent_topic_hint = match node.parent_id {
        None => None,
        Some(parent_id) => nodes::find_by_id(pool, parent_id)
            .await?
            .filter(|parent| parent.analysis_status == AnalysisStatus::Completed)
            .and_then(|parent| parent.topic),
    };

    let context = nodes::find_analysis_context(pool, node.id, context_cutoff_chars).await?;

    Ok(AnalysisRequest {
        node_id: node.id,
        parent_id: node.parent_id,
        content: node.content.clone(),
        parent_topic_hint,
        baseline_topic: context.baseline_topic,
        full_context: context.full_context,
    })
}

/// Node operations behind the HTTP API
#[derive(Clone)]
pub struct NodeService {
    db: SqlitePool,
    dispatcher: Dispatcher,
    event_bus: EventBus,
    context_cutoff_chars: usize,
}

impl NodeService {
    pub fn new(
        db: SqlitePool,
        dispatcher: Dispatcher,
        event_bus: EventBus,
        context_cutoff_chars: usize,
    ) -> Self {
        Self {
            db,
            dispatcher,
            event_bus,
            context_cutoff_chars,
        }
    }

    /// Store a node and queue its analysis
    pub async fn create_node(&self, parent_id: Option<i64>, content: &str) -> Result<Node> {
        if content.trim().is_empty() {
            return Err(Error::InvalidInput("content must not be blank".to_string()));
        }

        let node = nodes::insert_node(&self.db, parent_id, content).await?;
        info!(node_id = node.id, parent_id = ?node.parent_id, root_id = node.root_id, "Node created");

        self.event_bus.emit_lossy(MutrEvent::NodeCreated {
            node: node.to_info(),
            timestamp: Utc::now(),
        });

        self.dispatch(&node).await;
        Ok(node)
    }

    pub async fn get_node(&self, node_id: i64) -> Result<Node> {
        nodes::get_node(&self.db, node_id).await
    }

    /// Nodes of the lineage rooted at `root_id`, optionally only those whose
    /// content contains `keyword`
    ///
    /// An unknown galaxy is NotFound; a keyword with no matches is an empty list.
    pub async fn lineage(&self, root_id: i64, keyword: Option<&str>) -> Result<Vec<Node>> {
        let keyword = keyword.map(str::trim).filter(|k| !k.is_empty());
        let Some(keyword) = keyword else {
            let lineage = nodes::find_by_root(&self.db, root_id).await?;
            if lineage.is_empty() {
                return Err(Error::NotFound(format!("Galaxy {} not found", root_id)));
            }
            return Ok(lineage);
        };

        let root = nodes::get_node(&self.db, root_id).await?;
        if root.parent_id.is_some() {
            return Err(Error::NotFound(format!("Galaxy {} not found", root_id)));
        }
        nodes::search_galaxy(&self.db, root_id, keyword).await
    }

    /// Explicit retry: FAILED/COMPLETED → PENDING, then resubmit
    pub async fn retry(&self, node_id: i64) -> Result<Node> {
        nodes::retry_analysis(&self.db, node_id).await?;
        let node = nodes::get_node(&self.db, node_id).await?;
        info!(node_id, "Analysis retry requested");

        self.dispatch(&node).await;
        Ok(node)
    }

    /// Submit the node's analysis; failures leave it PENDING for recovery
    async fn dispatch(&self, node: &Node) {
        let request = match analysis_request_for(&self.db, node, self.context_cutoff_chars).await {
            Ok(request) => request,
            Err(e) => {
                error!(node_id = node.id, error = %e, "Could not build analysis request");
                return;
            }
        };

        match self.dispatcher.submit(request).await {
            Ok(true) => {}
            Ok(false) => warn!(node_id = node.id, "Analysis already queued"),
            Err(e) => error!(
                node_id = node.id,
                error = %e,
                "Could not queue analysis, node left PENDING for recovery"
            ),
        }
    }
}
