//! Named retry policies used by the storage providers.

use std::time::Duration;

use rand::Rng;

use super::{RetryDecision, RetryPolicy};
use crate::domain::{StorageError, TransportError};

/// Server busy / internal error / timeout / connection reset.
///
/// Quadratic backoff: delay = min(300s, (n + 1)^2 seconds)
/// - attempt 0: 1s
/// - attempt 1: 4s
/// - attempt 2: 9s
/// - attempt 17 and later: 300s
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientServerError;

impl TransientServerError {
    pub const MAX_ATTEMPTS: u32 = 30;
    const MAX_DELAY_SECS: u64 = 300;
}

impl RetryPolicy for TransientServerError {
    fn decide(&self, attempt: u32, error: &StorageError) -> RetryDecision {
        let transient = error.transport().is_some_and(TransportError::is_transient);
        if !transient || attempt >= Self::MAX_ATTEMPTS {
            return RetryDecision::Fatal;
        }
        let n = u64::from(attempt) + 1;
        RetryDecision::Retry(Duration::from_secs((n * n).min(Self::MAX_DELAY_SECS)))
    }
}

/// Containers and queues that are not visible yet right after creation, or
/// still being deleted when we try to recreate them.
///
/// Linear backoff: delay = 100ms * n
#[derive(Debug, Clone, Copy, Default)]
pub struct SlowInstantiation;

impl SlowInstantiation {
    pub const MAX_ATTEMPTS: u32 = 30;
}

impl RetryPolicy for SlowInstantiation {
    fn decide(&self, attempt: u32, error: &StorageError) -> RetryDecision {
        let matches = matches!(
            error.transport(),
            Some(
                TransportError::ContainerNotFound(_)
                    | TransportError::QueueNotFound(_)
                    | TransportError::BeingDeleted(_)
            )
        );
        if !matches || attempt >= Self::MAX_ATTEMPTS {
            return RetryDecision::Fatal;
        }
        RetryDecision::Retry(Duration::from_millis(100 * u64::from(attempt)))
    }
}

/// Checksum mismatches. Retried immediately, a few times only: beyond that
/// the corruption is real, not noise on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkCorruption;

impl NetworkCorruption {
    pub const MAX_ATTEMPTS: u32 = 3;
}

impl RetryPolicy for NetworkCorruption {
    fn decide(&self, attempt: u32, error: &StorageError) -> RetryDecision {
        match error {
            StorageError::DataCorruption { .. } if attempt < Self::MAX_ATTEMPTS => {
                RetryDecision::Retry(Duration::ZERO)
            }
            _ => RetryDecision::Fatal,
        }
    }
}

/// Etag conflicts between competing writers.
///
/// Random delay in [0, min(10s, 10ms + n^2 * 10ms)] so that writers
/// desynchronize instead of colliding again.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimisticConcurrency;

impl OptimisticConcurrency {
    pub const MAX_ATTEMPTS: u32 = 30;
    const MAX_DELAY_MS: u64 = 10_000;

    /// Upper bound of the jittered delay for attempt `n`.
    pub fn max_delay(attempt: u32) -> Duration {
        let n = u64::from(attempt);
        Duration::from_millis((10 + n * n * 10).min(Self::MAX_DELAY_MS))
    }
}

impl RetryPolicy for OptimisticConcurrency {
    fn decide(&self, attempt: u32, error: &StorageError) -> RetryDecision {
        let conflict = matches!(error.transport(), Some(TransportError::ConditionNotMet));
        if !conflict || attempt >= Self::MAX_ATTEMPTS {
            return RetryDecision::Fatal;
        }
        let max_ms = Self::max_delay(attempt).as_millis() as u64;
        let delay_ms = rand::thread_rng().gen_range(0..=max_ms);
        RetryDecision::Retry(Duration::from_millis(delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn transport(err: TransportError) -> StorageError {
        err.into()
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 4)]
    #[case(2, 9)]
    #[case(16, 289)]
    #[case(17, 300)]
    #[case(29, 300)]
    fn transient_backoff_is_quadratic_and_capped(#[case] attempt: u32, #[case] secs: u64) {
        let decision = TransientServerError.decide(attempt, &transport(TransportError::Timeout));
        assert_eq!(decision, RetryDecision::Retry(Duration::from_secs(secs)));
    }

    #[test]
    fn transient_gives_up_after_cap() {
        let err = transport(TransportError::ServerBusy);
        assert_eq!(TransientServerError.decide(30, &err), RetryDecision::Fatal);
    }

    #[rstest]
    #[case(TransportError::ServerBusy, true)]
    #[case(TransportError::ConnectionReset, true)]
    #[case(TransportError::Internal("500".into()), true)]
    #[case(TransportError::ConditionNotMet, false)]
    #[case(TransportError::ContainerNotFound("c".into()), false)]
    fn transient_matches_server_errors_only(#[case] err: TransportError, #[case] retried: bool) {
        let decision = TransientServerError.decide(0, &transport(err));
        assert_eq!(decision != RetryDecision::Fatal, retried);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 100)]
    #[case(5, 500)]
    fn slow_instantiation_backoff_is_linear(#[case] attempt: u32, #[case] ms: u64) {
        let err = transport(TransportError::QueueNotFound("q".into()));
        assert_eq!(
            SlowInstantiation.decide(attempt, &err),
            RetryDecision::Retry(Duration::from_millis(ms))
        );
    }

    #[test]
    fn slow_instantiation_ignores_missing_blobs() {
        let err = transport(TransportError::BlobNotFound {
            container: "c".into(),
            name: "n".into(),
        });
        assert_eq!(SlowInstantiation.decide(0, &err), RetryDecision::Fatal);
        let err = transport(TransportError::BeingDeleted("c".into()));
        assert_ne!(SlowInstantiation.decide(0, &err), RetryDecision::Fatal);
    }

    #[test]
    fn network_corruption_allows_three_retries() {
        let err = StorageError::DataCorruption {
            container: "c".into(),
            name: "n".into(),
        };
        for attempt in 0..3 {
            assert_eq!(
                NetworkCorruption.decide(attempt, &err),
                RetryDecision::Retry(Duration::ZERO)
            );
        }
        assert_eq!(NetworkCorruption.decide(3, &err), RetryDecision::Fatal);
        assert_eq!(
            NetworkCorruption.decide(0, &transport(TransportError::ServerBusy)),
            RetryDecision::Fatal
        );
    }

    #[test]
    fn optimistic_concurrency_delay_is_bounded() {
        let err = transport(TransportError::ConditionNotMet);
        for attempt in 0..30 {
            match OptimisticConcurrency.decide(attempt, &err) {
                RetryDecision::Retry(delay) => {
                    assert!(delay <= OptimisticConcurrency::max_delay(attempt))
                }
                RetryDecision::Fatal => panic!("attempt {attempt} should be retried"),
            }
        }
        assert_eq!(OptimisticConcurrency.decide(30, &err), RetryDecision::Fatal);
        assert_eq!(
            OptimisticConcurrency::max_delay(100),
            Duration::from_millis(10_000)
        );
    }
}
