//! Analysis ordering coordinator
//!
//! Guarantees a node is classified only after its parent. State lives in the
//! shared database so several service instances can coordinate:
//!
//! - `analysis_readiness`: per node, `in_flight` while registered for
//!   analysis, `ready` once completed. No marker (or an expired one) means
//!   ready.
//! - `analysis_waiting`: requests held under a parent that was in flight,
//!   drained in FIFO order when the parent is released.
//!
//! Admission (register, check parent, hold) and release (clear marker, drain
//! dependents) are each one transaction that writes first, so SQLite takes
//! the write lock before anything is read. Two admissions or releases never
//! interleave, which rules out both a lost wakeup and a double release.

use chrono::{Duration as ChronoDuration, Utc};
use mutr_common::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::{coordination, to_db_timestamp};
use crate::models::AnalysisRequest;
use crate::utils::{begin_monitored, retry_on_lock};

/// Coordinator tuning
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Lifetime of a held request whose parent never releases it
    pub waiting_ttl: Duration,
    /// Lifetime of readiness markers
    pub readiness_ttl: Duration,
    /// Budget for retrying a locked database
    pub max_lock_wait_ms: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            waiting_ttl: Duration::from_secs(3600),
            readiness_ttl: Duration::from_secs(3600),
            max_lock_wait_ms: 5000,
        }
    }
}

/// Outcome of admitting a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Parent is ready; the caller processes the request now
    Ready,
    /// Parent is in flight; the request was held under it
    Held,
}

/// Shared readiness store and waiting queue
#[derive(Clone)]
pub struct AnalysisCoordinator {
    db: SqlitePool,
    settings: CoordinatorSettings,
}

fn expiry(ttl: Duration) -> String {
    let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1));
    to_db_timestamp(Utc::now() + ttl)
}

fn encode(request: &AnalysisRequest) -> Result<String> {
    serde_json::to_string(request)
        .map_err(|e| Error::Internal(format!("Failed to serialize request: {}", e)))
}

impl AnalysisCoordinator {
    pub fn new(db: SqlitePool, settings: CoordinatorSettings) -> Self {
        Self { db, settings }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Register a node as in flight so later children wait for it
    pub async fn start(&self, node_id: i64) -> Result<()> {
        retry_on_lock("coordinator::start", self.settings.max_lock_wait_ms, || async move {
            let mut tx = begin_monitored(&self.db, "coordinator::start").await?;
            coordination::upsert_in_flight(
                tx.conn()?,
                node_id,
                &to_db_timestamp(Utc::now()),
                &expiry(self.settings.readiness_ttl),
            )
            .await?;
            tx.commit().await
        })
        .await
    }

    /// True if `parent_id` is absent, `topic_hint` is non-blank, or the parent
    /// holds no in-flight marker
    pub async fn is_ready(&self, parent_id: Option<i64>, topic_hint: Option<&str>) -> Result<bool> {
        let parent_id = match parent_id {
            None => return Ok(true),
            Some(id) => id,
        };
        if topic_hint.is_some_and(|hint| !hint.trim().is_empty()) {
            return Ok(true);
        }

        let mut conn = self.db.acquire().await?;
        let in_flight =
            coordination::is_in_flight(&mut conn, parent_id, &to_db_timestamp(Utc::now())).await?;
        Ok(!in_flight)
    }

    /// Append a request to the list held under `parent_id`
    pub async fn hold(&self, parent_id: i64, request: &AnalysisRequest) -> Result<()> {
        let encoded = encode(request)?;
        let encoded = encoded.as_str();
        retry_on_lock("coordinator::hold", self.settings.max_lock_wait_ms, || async move {
            let mut tx = begin_monitored(&self.db, "coordinator::hold").await?;
            coordination::push_waiting(
                tx.conn()?,
                parent_id,
                request.node_id,
                encoded,
                &to_db_timestamp(Utc::now()),
                &expiry(self.settings.waiting_ttl),
            )
            .await?;
            tx.commit().await
        })
        .await
    }

    /// Register the node, test its parent and hold it if needed, atomically
    pub async fn admit(&self, request: &AnalysisRequest) -> Result<Admission> {
        let encoded = encode(request)?;
        let encoded = encoded.as_str();
        retry_on_lock("coordinator::admit", self.settings.max_lock_wait_ms, || {
            self.admit_once(request, encoded)
        })
        .await
    }

    async fn admit_once(&self, request: &AnalysisRequest, encoded: &str) -> Result<Admission> {
        let now = to_db_timestamp(Utc::now());
        let mut tx = begin_monitored(&self.db, "coordinator::admit").await?;

        // Write first: the upsert takes the write lock before the parent is read
        coordination::upsert_in_flight(
            tx.conn()?,
            request.node_id,
            &now,
            &expiry(self.settings.readiness_ttl),
        )
        .await?;

        let admission = match (request.parent_id, request.topic_hint()) {
            (None, _) | (_, Some(_)) => Admission::Ready,
            (Some(parent_id), None) => {
                if coordination::is_in_flight(tx.conn()?, parent_id, &now).await? {
                    coordination::push_waiting(
                        tx.conn()?,
                        parent_id,
                        request.node_id,
                        encoded,
                        &now,
                        &expiry(self.settings.waiting_ttl),
                    )
                    .await?;
                    Admission::Held
                } else {
                    Admission::Ready
                }
            }
        };

        tx.commit().await?;
        Ok(admission)
    }

    /// Record completion inside the caller's transaction
    pub async fn mark_ready(&self, conn: &mut SqliteConnection, node_id: i64) -> Result<()> {
        coordination::upsert_ready(
            conn,
            node_id,
            &to_db_timestamp(Utc::now()),
            &expiry(self.settings.readiness_ttl),
        )
        .await
    }

    /// Clear the node's in-flight marker and take every request held under it
    ///
    /// Concurrent calls for the same node return the held list exactly once in
    /// total. Expired entries are dropped.
    pub async fn release(&self, node_id: i64) -> Result<Vec<AnalysisRequest>> {
        let rows = retry_on_lock("coordinator::release", self.settings.max_lock_wait_ms, || async move {
            let mut tx = begin_monitored(&self.db, "coordinator::release").await?;
            coordination::clear_in_flight(tx.conn()?, node_id).await?;
            let rows = coordination::drain_waiting(tx.conn()?, node_id).await?;
            tx.commit().await?;
            Ok::<_, Error>(rows)
        })
        .await?;

        let now = to_db_timestamp(Utc::now());
        let mut released = Vec::with_capacity(rows.len());
        for row in rows {
            if row.expires_at <= now {
                warn!(
                    parent_id = node_id,
                    node_id = row.node_id,
                    "Dropping expired held request"
                );
                continue;
            }
            match serde_json::from_str::<AnalysisRequest>(&row.request) {
                Ok(request) => released.push(request),
                Err(e) => error!(
                    parent_id = node_id,
                    node_id = row.node_id,
                    error = %e,
                    "Discarding undecodable held request"
                ),
            }
        }

        if !released.is_empty() {
            debug!(parent_id = node_id, count = released.len(), "Released held dependents");
        }

        Ok(released)
    }

    /// Delete held entries for the given nodes (recovery resubmits them)
    pub async fn forget_held(&self, node_ids: &[i64]) -> Result<u64> {
        retry_on_lock("coordinator::forget_held", self.settings.max_lock_wait_ms, || async move {
            let mut tx = begin_monitored(&self.db, "coordinator::forget_held").await?;
            let removed = coordination::delete_waiting_for_nodes(tx.conn()?, node_ids).await?;
            tx.commit().await?;
            Ok::<_, Error>(removed)
        })
        .await
    }

    /// Delete expired markers and held entries
    pub async fn purge_expired(&self) -> Result<(u64, u64)> {
        retry_on_lock("coordinator::purge_expired", self.settings.max_lock_wait_ms, || async move {
            let mut tx = begin_monitored(&self.db, "coordinator::purge_expired").await?;
            let purged =
                coordination::purge_expired(tx.conn()?, &to_db_timestamp(Utc::now())).await?;
            tx.commit().await?;
            Ok::<_, Error>(purged)
        })
        .await
    }

    /// Purge expired state every `interval` until cancelled
    pub async fn run_janitor(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.purge_expired().await {
                        Ok((0, 0)) => {}
                        Ok((readiness, waiting)) => info!(
                            readiness,
                            waiting,
                            "Purged expired coordination entries"
                        ),
                        Err(e) => error!(error = %e, "Coordination purge failed"),
                    }
                }
            }
        }
    }
}
