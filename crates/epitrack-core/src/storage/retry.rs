//! Retry for reads that collide with the ingestion process.
//!
//! The external ingester writes to the same SQLite file the daemon reads.
//! A read that lands while the writer holds the lock or checkpoints the WAL
//! can fail with a busy/locked code even though nothing is wrong, so reads
//! are retried a few times with exponential backoff before surfacing.

use std::future::Future;
use std::time::Duration;

/// Maximum number of retry attempts for a read
pub const MAX_RETRIES: u32 = 4;

/// Check if a SQLite error is transient and should be retried
///
/// - SQLITE_BUSY (5)
/// - SQLITE_LOCKED (6)
/// - SQLITE_BUSY_RECOVERY (261): WAL recovery in progress (5 | 1<<8)
/// - SQLITE_BUSY_SNAPSHOT (517): stale read snapshot (5 | 2<<8)
/// - SQLITE_LOCKED_SHAREDCACHE (262)
pub fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string());
            matches!(
                code.as_deref(),
                Some("5") | Some("6") | Some("261") | Some("262") | Some("517")
            )
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Delays: 100ms, 200ms, 400ms, 800ms
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(100 * 2u64.pow(attempt.saturating_sub(1)))
}

/// Run a read operation, retrying transient errors with exponential backoff
pub async fn query_with_retry<F, Fut, T>(operation: F) -> std::result::Result<T, sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if is_transient_error(&e) && attempts < MAX_RETRIES => {
                attempts += 1;
                let delay = backoff_delay(attempts);
                tracing::debug!(
                    error = %e,
                    attempt = attempts,
                    max_retries = MAX_RETRIES,
                    delay_ms = delay.as_millis(),
                    "Store busy, retrying read"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
