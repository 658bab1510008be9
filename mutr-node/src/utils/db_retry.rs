//! Database Retry Logic
//!
//! Exponential backoff for transient SQLite lock contention. Several workers
//! and service instances write the readiness and waiting tables at once, so
//! "database is locked" is expected under load and must not fail a request.

use mutr_common::{Error, Result};
use std::time::{Duration, Instant};

/// First backoff delay
const INITIAL_BACKOFF_MS: u64 = 10;
/// Backoff ceiling
const MAX_BACKOFF_MS: u64 = 1000;

/// Retry a database operation with exponential backoff until max_wait_ms elapses.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If lock contention:
///    a. If time elapsed < max_wait_ms: log WARN, backoff, retry
///    b. If time elapsed >= max_wait_ms: log ERROR, return error
/// 4. If other error: return error immediately (no retry)
///
/// **Backoff Strategy:** 10ms doubling up to 1000ms.
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "admit", "release")
/// * `max_wait_ms` - Maximum total time to retry
/// * `operation` - Async closure that performs the database operation
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(
                operation = operation_name,
                attempt,
                "Retrying database operation"
            );
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    let elapsed_ms = start_time.elapsed().as_millis();
                    if elapsed_ms > 2000 {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = elapsed_ms,
                            "Database operation succeeded after significant retry period (>2s)"
                        );
                    } else {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = elapsed_ms,
                            "Database operation succeeded after retry"
                        );
                    }
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_lock_contention() {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();

                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "{}: database locked after {} attempts ({} ms elapsed, max {} ms)",
                        operation_name,
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    elapsed_ms = elapsed.as_millis(),
                    backoff_ms,
                    remaining_ms = max_duration.saturating_sub(elapsed).as_millis(),
                    "Database locked, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn lock_error() -> Error {
        Error::Database(sqlx::Error::Protocol("database is locked".to_string()))
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_on_lock("test_op", 5000, || async { Ok::<i32, Error>(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_lock_errors() {
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result = retry_on_lock("test_op", 5000, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(lock_error())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fails_after_max_wait() {
        let result = retry_on_lock("test_op", 50, || async { Err::<i32, Error>(lock_error()) }).await;

        match result {
            Err(Error::Internal(msg)) => assert!(msg.contains("database locked")),
            other => panic!("expected Internal error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_lock_error_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result = retry_on_lock("test_op", 5000, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<i32, Error>(Error::Internal("other error".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
