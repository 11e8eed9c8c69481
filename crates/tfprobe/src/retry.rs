//! Bounded retry with fixed backoff and cancellation support.
//!
//! Provides a generic combinator for retrying fallible async operations: a
//! predicate decides which errors are worth another attempt, a policy bounds
//! the attempts and spaces them with a fixed delay.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use backon::{BackoffBuilder, ConstantBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Attempt and backoff bounds for a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// Retry `operation` under `policy`, consulting `is_retryable` on each error.
///
/// Whatever the last attempt produced is propagated: the value on success,
/// the final error (with attempt context) on failure. Errors the predicate
/// rejects are returned immediately without further attempts.
///
/// # Arguments
/// * `policy` - Attempt and backoff bounds
/// * `cancel` - Optional cancellation token, checked before each attempt
/// * `is_retryable` - Predicate over the error value
/// * `operation` - Async operation to retry
/// * `what` - Name for logging
pub async fn retry_with_policy<T, E, F, Fut, P>(
    policy: RetryPolicy,
    cancel: Option<&CancellationToken>,
    is_retryable: P,
    operation: F,
    what: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::error::Error + Send + Sync + 'static,
{
    let backoff = ConstantBuilder::default()
        .with_delay(policy.backoff)
        .with_max_times(policy.max_attempts as usize)
        .build();
    let mut delays = backoff.into_iter();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        if let Some(token) = cancel {
            if token.is_cancelled() {
                anyhow::bail!("{what} cancelled");
            }
        }

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(what = %what, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let delay = delays.next().unwrap_or(policy.backoff);
                warn!(
                    what = %what,
                    error = %e,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_secs = delay.as_secs(),
                    "Attempt failed, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = async {
                        if let Some(token) = cancel {
                            token.cancelled().await
                        } else {
                            std::future::pending::<()>().await
                        }
                    } => {
                        anyhow::bail!("{what} cancelled");
                    }
                }
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("{what} failed after {attempt} attempt(s)")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("boom ({retryable})")]
    struct TestError {
        retryable: bool,
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_with_policy(
            fast_policy(3),
            None,
            |_: &TestError| true,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            },
            "test op",
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<&str> = retry_with_policy(
            fast_policy(3),
            None,
            |_: &TestError| true,
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError { retryable: true })
                } else {
                    Ok("done")
                }
            },
            "test op",
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_propagates_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_policy(
            fast_policy(3),
            None,
            |_: &TestError| true,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError { retryable: true })
            },
            "test op",
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("after 3 attempt(s)"));
        assert!(err.chain().any(|c| c.to_string().contains("boom")));
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_policy(
            fast_policy(5),
            None,
            |e: &TestError| e.retryable,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError { retryable: false })
            },
            "test op",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_attempt() {
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<()> = retry_with_policy(
            fast_policy(3),
            Some(&token),
            |_: &TestError| true,
            || async { Err(TestError { retryable: true }) },
            "test op",
        )
        .await;

        assert!(result.unwrap_err().to_string().contains("cancelled"));
    }
}
