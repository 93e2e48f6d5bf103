//! Explicit retry policy with exponential backoff.
//!
//! Wrapped imperatively around a fallible async operation. Errors are
//! classified through [`Retryable`]: fatal errors return after the first
//! attempt, transient ones are retried until the attempt budget is spent.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::Retryable;

/// Failure after the policy gave up.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    /// Total attempts made, including the first.
    pub attempts: u32,
    /// `true` when the budget ran out, `false` for a fatal error.
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            multiplier: if multiplier < 1.0 { 1.0 } else { multiplier },
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.multiplier,
        )
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 1.0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(retry.saturating_sub(1).min(32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `op` until it succeeds, fails fatally, or the budget is spent.
    ///
    /// `op` receives the 1-based attempt number. On success the attempt
    /// count is returned alongside the value.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<(T, u32), RetryFailure<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) if !error.is_retryable() => {
                    debug!(attempt, error = %error, "fatal error, not retrying");
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                        exhausted: false,
                    });
                }
                Err(error) if attempt >= self.max_attempts => {
                    warn!(attempts = attempt, error = %error, "retry budget exhausted");
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                        exhausted: true,
                    });
                }
                Err(error) => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "transient error, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    enum TestError {
        Flaky,
        Broken,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Flaky)
        }
        fn error_type(&self) -> &'static str {
            "test"
        }
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(5), 2.0)
    }

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(1_000), 2.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO, 2.0);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = fast_policy(5)
            .run(|_| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError::Flaky)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        let (value, attempts) = result.unwrap();
        assert_eq!(value, "done");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn fatal_error_skips_retry_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let failure = fast_policy(5)
            .run(|_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::Broken)
                }
            })
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert!(!failure.exhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempt_count() {
        let failure = fast_policy(3)
            .run(|_| async { Err::<(), _>(TestError::Flaky) })
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert!(failure.exhausted);
    }
}
