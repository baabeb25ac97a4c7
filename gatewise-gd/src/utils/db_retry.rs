//! Database retry logic
//!
//! Exponential backoff for transient SQLite lock errors. Background
//! cycles for different sessions share one database file; short lock
//! windows are expected and retried, anything else propagates
//! immediately.

use gatewise_common::{Error, Result};
use std::time::{Duration, Instant};

/// Retry a database operation with exponential backoff until
/// `max_wait_ms` elapses.
///
/// Only "database is locked" errors are retried; other errors return
/// immediately. Backoff starts at 10ms and doubles up to 1s.
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
    let mut backoff_ms = 10u64;

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
                let elapsed_ms = start_time.elapsed().as_millis();
                if attempt > 1 && elapsed_ms > 2000 {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed_ms as u64,
                        "Database operation succeeded after significant retry period"
                    );
                }
                return Ok(result);
            }
            Err(err) if is_lock_error(&err) => {
                if start_time.elapsed() >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        "Database lock retries exhausted"
                    );
                    return Err(err);
                }
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(sqlx_err) => sqlx_err
            .as_database_error()
            .map(|e| e.message().contains("database is locked"))
            .unwrap_or(false),
        _ => false,
    }
}
