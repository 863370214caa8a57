//! Bounded retry policy shared by every fetch backend.
//!
//! The default policy is the one the download pipeline has always used:
//! three attempts in total with a fixed five second pause between them.

use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a retried operation ultimately failed.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error
    #[error("Max attempts ({max_attempts}) exhausted")]
    Exhausted { max_attempts: u32, last_error: E },

    /// An attempt failed with an error that must not be retried
    #[error("Non-retryable failure")]
    Aborted { last_error: E },
}

impl<E> RetryError<E> {
    /// The error of the final attempt.
    pub fn into_last_error(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } | RetryError::Aborted { last_error } => last_error,
        }
    }
}

/// Retry strategy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Pause between two attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(5))
    }
}

impl RetryPolicy {
    /// Same pause between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The final result (success or last error)
    pub result: Result<T, RetryError<E>>,
    /// Number of attempts made
    pub attempts: u32,
    /// Total time spent, including delays
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    /// Returns true if the operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns true if all attempts were used up.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.result, Err(RetryError::Exhausted { .. }))
    }
}

/// Determines if an error is retryable.
pub trait Retryable {
    /// Returns true if the error should be retried.
    fn is_retryable(&self) -> bool;
}

/// Executes an async operation under a retry policy.
///
/// The closure receives the 1-based attempt number. Failed attempts are
/// logged and otherwise invisible to the caller until the budget runs out or
/// a non-retryable error shows up.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let start = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation(attempts).await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
            Err(e) if !e.is_retryable() => {
                log::warn!("Attempt {}/{} failed, not retryable: {}", attempts, max_attempts, e);
                return RetryResult {
                    result: Err(RetryError::Aborted { last_error: e }),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
            Err(e) if attempts < max_attempts => {
                let delay = policy.delay;
                log::warn!(
                    "Attempt {}/{} failed (retrying in {:?}): {}",
                    attempts,
                    max_attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                log::error!("Attempt {}/{} failed, giving up: {}", attempts, max_attempts, e);
                return RetryResult {
                    result: Err(RetryError::Exhausted {
                        max_attempts,
                        last_error: e,
                    }),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError(bool); // bool = is_retryable

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError(retryable={})", self.0)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        let result = retry(&policy, |_| async { Ok::<_, TestError>(42) }).await;

        assert!(result.is_ok());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry(&policy, |_| {
            let counter = counter_clone.clone();
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(TestError(true))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(result.attempts, 3);
        assert!(result.total_duration >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_uses_exact_budget() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = seen.clone();

        let result = retry(&policy, |attempt| {
            seen_clone.store(attempt, Ordering::SeqCst);
            async { Err::<i32, _>(TestError(true)) }
        })
        .await;

        assert!(result.is_exhausted());
        assert_eq!(result.attempts, 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry(&policy, |_| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError(false))
            }
        })
        .await;

        assert!(!result.is_exhausted());
        assert!(matches!(result.result, Err(RetryError::Aborted { .. })));
        assert_eq!(result.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
