//! Retry of writes that hit SQLite's `database is locked`
//!
//! Retries live at the persistence boundary only; the resolution pipeline
//! never retries a collaborator call.

use flyer_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};

const FIRST_BACKOFF: Duration = Duration::from_millis(10);
const BACKOFF_CAP: Duration = Duration::from_millis(1000);

/// Doubling backoff bounded by a total wait budget
#[derive(Debug, Clone, Copy)]
struct LockBackoff {
    started: Instant,
    budget: Duration,
    next: Duration,
}

impl LockBackoff {
    fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
            next: FIRST_BACKOFF,
        }
    }

    /// Delay before the next attempt, or None once the budget is spent
    fn step(&mut self) -> Option<Duration> {
        if self.started.elapsed() >= self.budget {
            return None;
        }
        let delay = self.next;
        self.next = (self.next * 2).min(BACKOFF_CAP);
        Some(delay)
    }
}

/// Run `operation` until it succeeds, fails with something other than a
/// lock error, or `max_wait_ms` has passed.
///
/// Backoff starts at 10 ms and doubles up to 1 s between attempts.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = LockBackoff::new(Duration::from_millis(max_wait_ms));
    let mut attempt = 1u32;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        waited_ms = backoff.started.elapsed().as_millis() as u64,
                        "Write went through after lock contention"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_database_locked() => err,
            Err(err) => return Err(err),
        };

        let Some(delay) = backoff.step() else {
            tracing::error!(
                operation = operation_name,
                attempt,
                max_wait_ms,
                error = %err,
                "Giving up on locked database"
            );
            return Err(Error::Internal(format!(
                "Database locked after {} attempts ({} ms budget) during {}",
                attempt, max_wait_ms, operation_name
            )));
        };

        tracing::warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Database locked, backing off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn locked() -> Error {
        Error::Database(sqlx::Error::Protocol("database is locked".to_string()))
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let mut backoff = LockBackoff::new(Duration::from_secs(60));
        let delays: Vec<u128> = (0..9).filter_map(|_| backoff.step()).map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 160, 320, 640, 1000, 1000]);
    }

    #[tokio::test]
    async fn test_usage_write_survives_transient_locks() {
        let attempts = AtomicU32::new(0);

        let result = retry_on_lock("record_certified_image_usage", 5000, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(locked())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_lock_budget_exhausted() {
        let result = retry_on_lock("begin_processing", 30, || async { Err::<(), Error>(locked()) }).await;

        match result {
            Err(Error::Internal(msg)) => {
                assert!(msg.contains("Database locked after"));
                assert!(msg.contains("begin_processing"));
            }
            other => panic!("expected lock timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        let attempts = AtomicU32::new(0);

        let result = retry_on_lock("finish_processing", 5000, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), Error>(Error::InvalidInput("bad status".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
