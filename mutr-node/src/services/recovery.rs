//! Startup recovery of unfinished analyses
//!
//! After a crash, nodes can be left PENDING (never processed, or held),
//! PROCESSING (engine call interrupted) or FAILED. Once the engine reports
//! SERVING, the scanner resets them to PENDING, discards their stale held
//! entries and re-submits them in creation order through the dispatcher.
//! Parents are therefore registered in flight before their children, and
//! the usual admission rules restore the ordering.

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::nodes;
use crate::error::AnalysisError;
use crate::models::AnalysisStatus;
use crate::services::classification_client::{ClassificationEngine, ServingStatus};
use crate::services::coordinator::AnalysisCoordinator;
use crate::services::dispatcher::Dispatcher;
use crate::services::node_service::analysis_request_for;

/// Scanner tuning
#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub health_check_attempts: u32,
    pub health_check_interval: Duration,
    pub context_cutoff_chars: usize,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            health_check_attempts: 30,
            health_check_interval: Duration::from_secs(10),
            context_cutoff_chars: 500,
        }
    }
}

/// Summary of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Unfinished nodes found
    pub found: usize,
    /// Nodes queued for analysis
    pub submitted: usize,
    /// Nodes skipped (already queued here, or moved on concurrently)
    pub skipped: usize,
}

pub struct RecoveryScanner {
    db: SqlitePool,
    coordinator: AnalysisCoordinator,
    engine: Arc<dyn ClassificationEngine>,
    dispatcher: Dispatcher,
    settings: RecoverySettings,
}

impl RecoveryScanner {
    pub fn new(
        db: SqlitePool,
        coordinator: AnalysisCoordinator,
        engine: Arc<dyn ClassificationEngine>,
        dispatcher: Dispatcher,
        settings: RecoverySettings,
    ) -> Self {
        Self {
            db,
            coordinator,
            engine,
            dispatcher,
            settings,
        }
    }

    /// Wait for the engine, then scan; gives up if the engine never serves
    pub async fn run(&self, cancel: CancellationToken) -> Option<RecoveryReport> {
        if !self.wait_for_engine(&cancel).await {
            return None;
        }

        match self.scan().await {
            Ok(report) => {
                info!(
                    found = report.found,
                    submitted = report.submitted,
                    skipped = report.skipped,
                    "Analysis recovery finished"
                );
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "Analysis recovery failed");
                None
            }
        }
    }

    /// Poll engine health up to the configured attempt budget
    pub async fn wait_for_engine(&self, cancel: &CancellationToken) -> bool {
        let attempts = self.settings.health_check_attempts.max(1);

        for attempt in 1..=attempts {
            match self.engine.health().await {
                Ok(ServingStatus::Serving) => {
                    info!(attempt, "Classification engine is serving");
                    return true;
                }
                Ok(status) => warn!(attempt, attempts, ?status, "Classification engine not serving yet"),
                Err(e) => warn!(attempt, attempts, error = %e, "Classification engine health check failed"),
            }

            if attempt < attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(self.settings.health_check_interval) => {}
                }
            }
        }

        error!(attempts, "Classification engine never became ready, skipping recovery");
        false
    }

    /// Re-submit every unfinished node in creation order
    pub async fn scan(&self) -> Result<RecoveryReport, AnalysisError> {
        if let Err(e) = self.coordinator.purge_expired().await {
            warn!(error = %e, "Could not purge expired coordination entries");
        }

        let unfinished = nodes::find_unfinished(&self.db, &AnalysisStatus::UNFINISHED).await?;

        let mut report = RecoveryReport {
            found: unfinished.len(),
            ..Default::default()
        };
        if unfinished.is_empty() {
            info!("No unfinished analyses to recover");
            return Ok(report);
        }

        let mut candidates = Vec::with_capacity(unfinished.len());
        for node in unfinished {
            if self.dispatcher.is_tracked(node.id) {
                report.skipped += 1;
                continue;
            }

            let reset = match node.analysis_status {
                AnalysisStatus::Processing => nodes::reset_abandoned(&self.db, node.id).await,
                AnalysisStatus::Failed => nodes::retry_analysis(&self.db, node.id).await,
                _ => Ok(()),
            };

            match reset {
                Ok(()) => candidates.push(node),
                Err(mutr_common::Error::InvalidState(msg)) => {
                    warn!(node_id = node.id, reason = %msg, "Node moved on during recovery, skipped");
                    report.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let candidate_ids: Vec<i64> = candidates.iter().map(|node| node.id).collect();
        let forgotten = self
            .coordinator
            .forget_held(&candidate_ids)
            .await
            .map_err(AnalysisError::Coordination)?;
        if forgotten > 0 {
            info!(forgotten, "Discarded stale held requests");
        }

        // Sequential: each submit registers the node before the next one
        for node in &candidates {
            let request =
                analysis_request_for(&self.db, node, self.settings.context_cutoff_chars).await?;

            match self.dispatcher.submit(request).await {
                Ok(true) => {
                    info!(node_id = node.id, parent_id = ?node.parent_id, "Recovered analysis queued");
                    report.submitted += 1;
                }
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    error!(node_id = node.id, error = %e, "Could not queue recovered analysis");
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }
}
