//! Bounded retry combinator

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// How many times an operation is attempted and how long to wait between tries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::ZERO)
    }
}

/// Why a retried operation gave up
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("all {attempts} attempts failed; last error: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    #[error("non-retryable error: {0}")]
    Fatal(#[source] E),
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The error that ended the retry loop
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal(e) => e,
        }
    }
}

/// Run `operation` up to `policy.max_attempts` times.
///
/// Returns the first success. An error for which `is_retryable` returns
/// `false` stops immediately with `RetryError::Fatal`. `operation` receives
/// the 1-based attempt number.
pub async fn retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    is_retryable: R,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => return Err(RetryError::Fatal(e)),
            Err(e) if attempt >= policy.max_attempts => {
                return Err(RetryError::Exhausted { attempts: attempt, last: e })
            }
            Err(e) => {
                warn!(attempt, max_attempts = policy.max_attempts, error = %e, "attempt failed; retrying");
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("fatal")]
        Fatal,
    }

    fn retryable(e: &TestError) -> bool {
        matches!(e, TestError::Transient)
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = Cell::new(0);
        let result = retry(&RetryPolicy::default(), retryable, |attempt| {
            calls.set(calls.get() + 1);
            async move {
                if attempt < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry(&RetryPolicy::default(), retryable, |_| {
            calls.set(calls.get() + 1);
            async { Err(TestError::Transient) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn fatal_errors_stop_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry(&RetryPolicy::default(), retryable, |_| {
            calls.set(calls.get() + 1);
            async { Err(TestError::Fatal) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Fatal(TestError::Fatal))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn policy_attempts_at_least_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
