//! Retry policy for transient store failures
//!
//! Transient `Unavailable` errors are retried with jittered backoff, at
//! most three attempts in total; every other error surfaces immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::kv::{StoreError, StoreResult};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 50;

/// Runs `op`, retrying transient failures.
pub async fn with_retry<T, F, Fut>(name: &str, mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(StoreError::Unavailable(reason)) if attempt < MAX_ATTEMPTS => {
                let jitter = rand::thread_rng().gen_range(0..BASE_BACKOFF_MS);
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * u64::from(attempt) + jitter);
                warn!(
                    op = name,
                    attempt,
                    %reason,
                    backoff_ms = backoff.as_millis() as u64,
                    "store operation failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_unavailable_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Unavailable("flaky".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Unavailable("down".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_conflict() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Conflict) }
        })
        .await;
        assert_eq!(result, Err(StoreError::Conflict));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
