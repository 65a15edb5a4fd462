use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::ActivityError;

/// Retry settings for one synchronous activity.
///
/// Each attempt is bounded by `attempt_timeout`; an attempt that runs over
/// counts as a transient failure. Permanent failures are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    /// Delay before the second attempt; doubles for each further attempt.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, attempt_timeout: Duration, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt_timeout,
            backoff,
        }
    }

    /// Policy for directory moves.
    pub fn for_rename(config: &RetryConfig) -> Self {
        Self::new(
            config.rename_attempts,
            Duration::from_secs(config.attempt_timeout_secs),
            Duration::from_millis(config.backoff_millis),
        )
    }

    /// A single bounded attempt, used for listing and directory creation.
    pub fn single_attempt(config: &RetryConfig) -> Self {
        Self::new(
            1,
            Duration::from_secs(config.attempt_timeout_secs),
            Duration::ZERO,
        )
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << (attempt.saturating_sub(2)).min(16))
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<F, Fut, T>(&self, operation: &str, mut op: F) -> Result<T, ActivityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                let delay = self.delay_before(attempt);
                log::info!(
                    "Retrying {} (attempt {}/{}) after {:?}",
                    operation,
                    attempt,
                    self.max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            let result = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ActivityError::TimedOut {
                    operation: operation.to_string(),
                    seconds: self.attempt_timeout.as_secs(),
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    log::warn!("{} failed with retryable error: {}", operation, e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(200), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast(3)
            .run("rename", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(ActivityError::transient("rename", "busy"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast(3)
            .run("rename", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ActivityError::transient("rename", "busy")) }
            })
            .await;
        assert!(matches!(result, Err(ActivityError::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast(3)
            .run("rename", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ActivityError::permanent("rename", "no such directory")) }
            })
            .await;
        assert!(matches!(result, Err(ActivityError::Permanent { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::ZERO);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run("list", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;
        assert!(matches!(result, Err(ActivityError::TimedOut { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_policies_from_config() {
        let config = RetryConfig::default();
        assert_eq!(RetryPolicy::for_rename(&config).max_attempts, 3);
        assert_eq!(RetryPolicy::single_attempt(&config).max_attempts, 1);
        assert_eq!(
            RetryPolicy::for_rename(&config).attempt_timeout,
            Duration::from_secs(10)
        );
    }
}
