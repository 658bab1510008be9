//! Transaction timing instrumentation
//!
//! Coordination transactions hold the SQLite write lock; a slow one stalls
//! every worker. `begin_monitored` logs how long a transaction waited for a
//! connection and how long it held it.

use mutr_common::{Error, Result};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::time::Instant;

/// Transaction wrapper that logs acquisition and release timing
pub struct MonitoredTransaction<'c> {
    tx: Option<Transaction<'c, Sqlite>>,
    caller: &'static str,
    acquired_at: Instant,
}

impl<'c> MonitoredTransaction<'c> {
    fn new(tx: Transaction<'c, Sqlite>, caller: &'static str, acquired_at: Instant) -> Self {
        Self {
            tx: Some(tx),
            caller,
            acquired_at,
        }
    }

    /// Connection to run statements on
    pub fn conn(&mut self) -> Result<&mut SqliteConnection> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(Error::Internal(format!(
                "{}: transaction already consumed",
                self.caller
            ))),
        }
    }

    /// Commit the transaction and log release timing
    pub async fn commit(mut self) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| {
            Error::Internal(format!("{}: transaction already consumed", self.caller))
        })?;

        tx.commit().await?;

        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > 1000 {
            tracing::warn!(
                caller = self.caller,
                held_ms = held_ms,
                "Long transaction held the write lock"
            );
        } else {
            tracing::trace!(
                caller = self.caller,
                held_ms = held_ms,
                "Connection released (commit)"
            );
        }

        Ok(())
    }
}

impl<'c> Drop for MonitoredTransaction<'c> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            // Dropping an uncommitted sqlx transaction rolls it back
            tracing::debug!(
                caller = self.caller,
                held_ms = self.acquired_at.elapsed().as_millis(),
                "Transaction rolled back (drop)"
            );
        }
    }
}

/// Begin a monitored transaction
///
/// # Example
/// ```ignore
/// let mut tx = begin_monitored(&pool, "coordinator::release").await?;
/// sqlx::query("...").execute(tx.conn()?).await?;
/// tx.commit().await?;
/// ```
pub async fn begin_monitored<'c>(
    pool: &'c sqlx::SqlitePool,
    caller: &'static str,
) -> Result<MonitoredTransaction<'c>> {
    let start = Instant::now();

    let tx = pool.begin().await?;

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > 1000 {
        tracing::warn!(
            caller = caller,
            wait_ms = wait_ms,
            "Slow connection acquisition, pool may be saturated"
        );
    }

    Ok(MonitoredTransaction::new(tx, caller, Instant::now()))
}
