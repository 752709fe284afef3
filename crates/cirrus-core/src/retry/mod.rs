//! Retry policy engine: classifies errors and decides backoff delays.
//!
//! Design:
//! - A policy is a pure function `(attempt, last_error) -> RetryDecision`.
//! - Policies compose with `first.or(second)`: `second` is only consulted when
//!   `first` declares the error fatal.
//! - `retry` re-runs the whole operation, so the operation must be safe to
//!   execute again.

mod policies;

pub use policies::{
    NetworkCorruption, OptimisticConcurrency, SlowInstantiation, TransientServerError,
};

use std::future::Future;
use std::time::Duration;

use crate::domain::StorageError;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait for the given delay, then run the operation again.
    Retry(Duration),

    /// Give up and propagate the error.
    Fatal,
}

/// Classifies an error observed on attempt `attempt` (0-indexed).
pub trait RetryPolicy: Send + Sync {
    fn decide(&self, attempt: u32, error: &StorageError) -> RetryDecision;

    /// Consult `self` first, then `fallback`.
    fn or<P: RetryPolicy>(self, fallback: P) -> Or<Self, P>
    where
        Self: Sized,
    {
        Or {
            first: self,
            second: fallback,
        }
    }
}

/// "First-then-second" combinator.
#[derive(Debug, Clone, Copy)]
pub struct Or<A, B> {
    first: A,
    second: B,
}

impl<A: RetryPolicy, B: RetryPolicy> RetryPolicy for Or<A, B> {
    fn decide(&self, attempt: u32, error: &StorageError) -> RetryDecision {
        match self.first.decide(attempt, error) {
            RetryDecision::Fatal => self.second.decide(attempt, error),
            retry => retry,
        }
    }
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn decide(&self, _attempt: u32, _error: &StorageError) -> RetryDecision {
        RetryDecision::Fatal
    }
}

/// Run `op` until it succeeds or `policy` declares its error fatal.
///
/// The delay is awaited on the calling task, which makes no other progress
/// meanwhile. When the policy gives up, the last error is returned as is.
pub async fn retry<T, P, F, Fut>(policy: &P, mut op: F) -> Result<T, StorageError>
where
    P: RetryPolicy + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt = 0u32;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        match policy.decide(attempt, &err) {
            RetryDecision::Fatal => return Err(err),
            RetryDecision::Retry(delay) => {
                tracing::debug!(attempt, ?delay, error = %err, "retrying storage operation");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransportError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn busy() -> StorageError {
        TransportError::ServerBusy.into()
    }

    #[test]
    fn or_falls_back_to_second_policy() {
        let policy = NetworkCorruption.or(TransientServerError);
        assert_eq!(
            policy.decide(0, &busy()),
            RetryDecision::Retry(Duration::from_secs(1))
        );

        let corruption = StorageError::DataCorruption {
            container: "c".into(),
            name: "n".into(),
        };
        assert_eq!(
            policy.decide(0, &corruption),
            RetryDecision::Retry(Duration::ZERO)
        );

        let conflict: StorageError = TransportError::ConditionNotMet.into();
        assert_eq!(policy.decide(0, &conflict), RetryDecision::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_reruns_until_success() {
        let calls = &AtomicU32::new(0);
        let result = retry(&TransientServerError, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(busy())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let calls = &AtomicU32::new(0);
        let _ = retry(&TransientServerError, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(busy())
            } else {
                Ok(())
            }
        })
        .await;

        // (0+1)^2 + (1+1)^2 seconds
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn exhausted_policy_surfaces_last_error() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry(&NetworkCorruption, || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::DataCorruption {
                container: "c".into(),
                name: format!("attempt-{n}"),
            })
        })
        .await;

        // first try + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            result,
            Err(StorageError::DataCorruption {
                container: "c".into(),
                name: "attempt-3".into(),
            })
        );
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry(&NoRetry, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(busy())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
