//! Analysis dispatcher and worker pool
//!
//! `submit` registers the node in flight before enqueueing, so callers that
//! submit in creation order (node creation, recovery) always register a
//! parent before its children. A fixed pool of tasks drains the channel and
//! runs `AnalysisWorker::process`; dependents a worker releases are
//! re-submitted from freshly spawned tasks, never on the parent's stack.
//!
//! The dispatcher tracks node ids that are queued or being processed and
//! drops duplicate submissions, so one process never runs a node twice.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::models::AnalysisRequest;
use crate::services::analysis_worker::{AnalysisWorker, ProcessOutcome};
use crate::services::coordinator::AnalysisCoordinator;

/// Dispatcher errors
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Worker pool has shut down
    #[error("Analysis queue closed")]
    Closed,

    /// In-flight registration failed
    #[error("Coordination error: {0}")]
    Coordination(#[from] mutr_common::Error),
}

/// Pool sizing
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub worker_count: usize,
    pub queue_capacity: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
        }
    }
}

struct DispatcherInner {
    tx: mpsc::Sender<AnalysisRequest>,
    coordinator: AnalysisCoordinator,
    tracked: Mutex<HashSet<i64>>,
}

/// Entry point for every analysis request
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

/// Receiver shared by the pool
type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<AnalysisRequest>>>;

impl Dispatcher {
    /// Spawn the worker pool; tasks stop when `cancel` fires
    pub fn start(
        worker: Arc<AnalysisWorker>,
        settings: DispatcherSettings,
        cancel: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let dispatcher = Self {
            inner: Arc::new(DispatcherInner {
                tx,
                coordinator: worker.coordinator().clone(),
                tracked: Mutex::new(HashSet::new()),
            }),
        };

        let rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        let handles = (0..settings.worker_count.max(1))
            .map(|worker_index| {
                tokio::spawn(run_worker(
                    worker_index,
                    worker.clone(),
                    dispatcher.clone(),
                    rx.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        info!(
            workers = settings.worker_count.max(1),
            queue_capacity = settings.queue_capacity.max(1),
            "Analysis worker pool started"
        );

        (dispatcher, handles)
    }

    /// Queue a request; `Ok(false)` if the node is already queued or active
    pub async fn submit(&self, request: AnalysisRequest) -> Result<bool, DispatchError> {
        let node_id = request.node_id;

        if !self.track(node_id) {
            debug!(node_id, "Duplicate submission ignored");
            return Ok(false);
        }

        if let Err(e) = self.inner.coordinator.start(node_id).await {
            self.untrack(node_id);
            return Err(DispatchError::Coordination(e));
        }

        if self.inner.tx.send(request).await.is_err() {
            self.untrack(node_id);
            return Err(DispatchError::Closed);
        }

        debug!(node_id, "Analysis request queued");
        Ok(true)
    }

    /// True while the node is queued or being processed here
    pub fn is_tracked(&self, node_id: i64) -> bool {
        self.lock_tracked().contains(&node_id)
    }

    /// Number of requests queued or being processed here
    pub fn tracked_count(&self) -> usize {
        self.lock_tracked().len()
    }

    fn track(&self, node_id: i64) -> bool {
        self.lock_tracked().insert(node_id)
    }

    fn untrack(&self, node_id: i64) {
        self.lock_tracked().remove(&node_id);
    }

    fn lock_tracked(&self) -> std::sync::MutexGuard<'_, HashSet<i64>> {
        // The set holds plain ids; a poisoned guard is still consistent
        self.inner
            .tracked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn run_worker(
    worker_index: usize,
    worker: Arc<AnalysisWorker>,
    dispatcher: Dispatcher,
    rx: SharedReceiver,
    cancel: CancellationToken,
) {
    debug!(worker_index, "Analysis worker started");

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = async { rx.lock().await.recv().await } => match request {
                Some(request) => request,
                None => break,
            },
        };

        let node_id = request.node_id;
        let report = worker.process(request).await;
        dispatcher.untrack(node_id);

        if let ProcessOutcome::Aborted(reason) = &report.outcome {
            debug!(worker_index, node_id, reason = %reason, "Request aborted");
        }

        for dependent in report.released {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let dependent_id = dependent.node_id;
                if let Err(e) = dispatcher.submit(dependent).await {
                    error!(
                        parent_id = node_id,
                        node_id = dependent_id,
                        error = %e,
                        "Failed to dispatch released dependent"
                    );
                }
            });
        }
    }

    debug!(worker_index, "Analysis worker stopped");
}
