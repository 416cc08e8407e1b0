//! Timeout and retry combinators for source calls.
//!
//! Both combinators check the caller's cancellation token at every await
//! point, so dropping or cancelling a request never waits out a backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::source::{SourceError, SourceResult};

/// Number of attempts and the constant pause between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// `attempts` tries separated by a constant `backoff`.
    pub fn fixed(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }
}

/// Races `op` against `duration` and `cancel`.
///
/// # Errors
///
/// - `SourceError::Cancelled` - The token fired first
/// - `SourceError::Timeout` - The deadline elapsed first
/// - Any error produced by `op` itself
pub async fn with_timeout<F, T>(
    op: F,
    duration: Duration,
    cancel: &CancellationToken,
) -> SourceResult<T>
where
    F: Future<Output = SourceResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SourceError::Cancelled),
        result = tokio::time::timeout(duration, op) => match result {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout { after: duration }),
        },
    }
}

/// Runs the operation produced by `make_op` until it succeeds, fails with
/// a non-retryable error, or the policy is exhausted.
///
/// `make_op` receives the 1-based attempt number. The last error is returned
/// when every attempt failed.
///
/// # Errors
///
/// - `SourceError::Cancelled` - The token fired before or between attempts
/// - The last attempt's error otherwise
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut make_op: F,
) -> SourceResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SourceResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = SourceError::Cancelled;

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        match make_op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) => {
                tracing::debug!(attempt, attempts, error = %error, "Attempt failed");
                last_error = error;
            }
        }

        if attempt < attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                _ = tokio::time::sleep(policy.backoff) => {}
            }
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn network_error() -> SourceError {
        SourceError::Network {
            reason: "connection reset".to_string(),
        }
    }

    #[test]
    fn test_fixed_policy_attempts_at_least_once() {
        let policy = RetryPolicy::fixed(0, Duration::from_secs(1));
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.backoff, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires() {
        let cancel = CancellationToken::new();
        let result: SourceResult<()> = with_timeout(
            std::future::pending(),
            Duration::from_secs(5),
            &cancel,
        )
        .await;
        assert_eq!(
            result,
            Err(SourceError::Timeout {
                after: Duration::from_secs(5)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_beats_timeout() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result: SourceResult<()> = with_timeout(
            std::future::pending(),
            Duration::from_secs(5),
            &cancel,
        )
        .await;
        assert_eq!(result, Err(SourceError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        let started = tokio::time::Instant::now();

        let result = with_retry(&policy, &cancel, |attempt| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(network_error())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_last_error() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::fixed(2, Duration::from_millis(10));

        let result: SourceResult<()> = with_retry(&policy, &cancel, |attempt| async move {
            Err(SourceError::Upstream {
                status: 500 + attempt as u16,
                url: "https://upstream.test".to_string(),
            })
        })
        .await;

        assert_eq!(
            result,
            Err(SourceError::Upstream {
                status: 502,
                url: "https://upstream.test".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_unsupported() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));

        let result: SourceResult<()> = with_retry(&policy, &cancel, |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Unsupported {
                    operation: "get_streaming_links",
                })
            }
        })
        .await;

        assert!(matches!(result, Err(SourceError::Unsupported { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(10));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let result: SourceResult<()> =
            with_retry(&policy, &cancel, |_| async { Err(network_error()) }).await;

        assert_eq!(result, Err(SourceError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
