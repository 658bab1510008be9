//! Analysis worker
//!
//! Drives one request through admission, classification and release:
//!
//! 1. Admit (register in flight, test parent readiness, hold if blocked).
//!    A held request stops here; its parent's release brings it back.
//! 2. Resolve the parent topic (hint, else the parent's stored topic).
//! 3. PENDING → PROCESSING.
//! 4. Call the engine with a timeout and bounded retry.
//! 5. Apply the result and mark ready in one transaction (→ COMPLETED).
//! 6. Notify after commit.
//! 7. Release dependents, whatever happened in 2-6.
//!
//! Exhausted engine attempts leave the node FAILED with `last_error` set.

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::db::nodes;
use crate::error::AnalysisError;
use crate::models::{AnalysisRequest, AnalysisResult, ClassificationInput, Node};
use crate::services::classification_client::{validate_result, ClassificationEngine, EngineError};
use crate::services::coordinator::{Admission, AnalysisCoordinator};
use crate::services::notification::NotificationSink;
use crate::utils::{begin_monitored, retry_on_lock};
use mutr_common::events::PUBLIC_GALAXY_CHANNEL;

/// Worker tuning
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Per-call engine deadline
    pub engine_timeout: Duration,
    /// Engine attempts before the node is marked FAILED
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure
    pub retry_backoff: Duration,
    /// Channel completed nodes are published on
    pub notification_channel: String,
    /// Budget for retrying a locked database
    pub max_lock_wait_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            engine_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            notification_channel: PUBLIC_GALAXY_CHANNEL.to_string(),
            max_lock_wait_ms: 5000,
        }
    }
}

/// What happened to a request
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Parent still in flight; request waits under it
    Held,
    /// Analysis committed
    Completed(Node),
    /// Engine attempts exhausted; node is FAILED
    Failed(String),
    /// Node was not PENDING (already handled elsewhere)
    Skipped,
    /// Store or coordination failure; node left for recovery
    Aborted(String),
}

/// Result of `process`: the outcome and the dependents it released
#[derive(Debug)]
pub struct ProcessReport {
    pub outcome: ProcessOutcome,
    pub released: Vec<AnalysisRequest>,
}

/// Orchestrates analysis of single requests
pub struct AnalysisWorker {
    db: SqlitePool,
    coordinator: AnalysisCoordinator,
    engine: Arc<dyn ClassificationEngine>,
    sink: Arc<dyn NotificationSink>,
    settings: WorkerSettings,
}

impl AnalysisWorker {
    pub fn new(
        db: SqlitePool,
        coordinator: AnalysisCoordinator,
        engine: Arc<dyn ClassificationEngine>,
        sink: Arc<dyn NotificationSink>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            db,
            coordinator,
            engine,
            sink,
            settings,
        }
    }

    pub fn coordinator(&self) -> &AnalysisCoordinator {
        &self.coordinator
    }

    /// Process one request; never panics on pipeline errors
    pub async fn process(&self, request: AnalysisRequest) -> ProcessReport {
        let node_id = request.node_id;

        match self.coordinator.admit(&request).await {
            Ok(Admission::Held) => {
                info!(
                    node_id,
                    parent_id = ?request.parent_id,
                    "Parent analysis in flight, request held"
                );
                return ProcessReport {
                    outcome: ProcessOutcome::Held,
                    released: Vec::new(),
                };
            }
            Ok(Admission::Ready) => {
                debug!(node_id, "Request admitted");
            }
            Err(e) => {
                let err = AnalysisError::Coordination(e);
                error!(node_id, error = %err, "Admission failed");
                let released = self.release(node_id).await;
                return ProcessReport {
                    outcome: ProcessOutcome::Aborted(err.to_string()),
                    released,
                };
            }
        }

        let outcome = match self.analyze(&request).await {
            Ok(node) => {
                // Committed: safe to notify
                self.sink.publish(&self.settings.notification_channel, &node);
                info!(
                    node_id,
                    topic = node.topic.as_deref().unwrap_or(""),
                    mutation_filter = node.mutation_filter.as_str(),
                    "Analysis completed"
                );
                ProcessOutcome::Completed(node)
            }
            Err(AnalysisError::InvalidState(msg)) => {
                warn!(node_id, reason = %msg, "Skipping request for node not in PENDING");
                ProcessOutcome::Skipped
            }
            Err(AnalysisError::Engine(e)) => {
                let message = e.to_string();
                error!(node_id, error = %message, "Analysis failed, node marked FAILED");
                self.sink.publish_failure(node_id, &message);
                ProcessOutcome::Failed(message)
            }
            Err(AnalysisError::NotFound(id)) => {
                warn!(node_id, missing = id, "Node vanished before analysis");
                ProcessOutcome::Aborted(format!("node {} not found", id))
            }
            Err(err @ AnalysisError::Coordination(_)) | Err(err @ AnalysisError::Store(_)) => {
                error!(node_id, error = %err, "Analysis aborted");
                ProcessOutcome::Aborted(err.to_string())
            }
        };

        let released = self.release(node_id).await;
        ProcessReport { outcome, released }
    }

    async fn release(&self, node_id: i64) -> Vec<AnalysisRequest> {
        match self.coordinator.release(node_id).await {
            Ok(released) => released,
            Err(e) => {
                error!(
                    node_id,
                    error = %AnalysisError::Coordination(e),
                    "Release failed, dependents wait for recovery"
                );
                Vec::new()
            }
        }
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<Node, AnalysisError> {
        let node_id = request.node_id;
        let parent_topic = self.resolve_parent_topic(request).await?;

        nodes::begin_analysis(&self.db, node_id).await.map_err(|e| match e {
            mutr_common::Error::NotFound(_) => AnalysisError::NotFound(node_id),
            other => AnalysisError::from(other),
        })?;

        let input = ClassificationInput {
            content: request.content.clone(),
            parent_topic,
            baseline_topic: request.baseline_topic.clone(),
            full_context: request.full_context.clone(),
        };

        let completed = match self.call_engine(node_id, &input).await {
            Ok(result) => self.complete(node_id, &result).await,
            Err(e) => Err(AnalysisError::Engine(e)),
        };

        match &completed {
            Ok(_) | Err(AnalysisError::InvalidState(_)) => {}
            Err(err) => {
                // Leave PROCESSING so the node is visibly failed and retryable
                if let Err(fail_err) = nodes::fail_analysis(&self.db, node_id, &err.to_string()).await {
                    error!(node_id, error = %fail_err, "Could not record analysis failure");
                }
            }
        }

        completed
    }

    async fn resolve_parent_topic(&self, request: &AnalysisRequest) -> Result<String, AnalysisError> {
        if let Some(hint) = request.topic_hint() {
            return Ok(hint.to_string());
        }
        match request.parent_id {
            None => Ok(String::new()),
            Some(parent_id) => Ok(nodes::find_topic(&self.db, parent_id)
                .await?
                .unwrap_or_default()),
        }
    }

    async fn call_engine(
        &self,
        node_id: i64,
        input: &ClassificationInput,
    ) -> Result<AnalysisResult, EngineError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut backoff = self.settings.retry_backoff;
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(
                self.settings.engine_timeout,
                self.engine.analyze(input),
            )
            .await
            {
                Ok(result) => result.and_then(validate_result),
                Err(_) => Err(EngineError::Timeout(
                    self.settings.engine_timeout.as_millis() as u64,
                )),
            };

            match result {
                Ok(result) => return Ok(result),
                Err(e) if attempt < max_attempts => {
                    warn!(
                        node_id,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Engine call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn complete(&self, node_id: i64, result: &AnalysisResult) -> Result<Node, AnalysisError> {
        retry_on_lock("worker::complete", self.settings.max_lock_wait_ms, || async move {
            let mut tx = begin_monitored(&self.db, "worker::complete").await?;
            nodes::complete_analysis(tx.conn()?, node_id, result).await?;
            self.coordinator.mark_ready(tx.conn()?, node_id).await?;
            tx.commit().await
        })
        .await?;

        Ok(nodes::get_node(&self.db, node_id).await?)
    }
}
