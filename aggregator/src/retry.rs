//! Bounded exponential backoff for downstream calls.

use crate::config::RetryConfig;
use crate::metrics_defs::DOWNSTREAM_RETRY;
use crate::outcome::CallOutcome;
use async_trait::async_trait;
use shared::counter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Waits between attempts. Swapped out in tests to observe delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base_delay,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.base_delay())
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Delay before retry number `retry` (1-based): `base_delay * 2^retry`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `attempt` until it succeeds, fails permanently, or the retries
    /// are used up. The last outcome is returned as is.
    pub async fn run<T, F, Fut>(&self, label: &str, mut attempt: F) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CallOutcome<T>>,
    {
        let mut outcome = attempt().await;
        let mut retry = 0;

        while retry < self.max_retries {
            let reason = match &outcome {
                CallOutcome::Failure(failure) if failure.kind.is_transient() => {
                    failure.to_string()
                }
                _ => break,
            };

            retry += 1;
            let delay = self.delay_for_retry(retry);
            tracing::warn!(
                source = label,
                attempt = retry,
                delay = ?delay,
                reason = %reason,
                "Retrying downstream call"
            );
            counter!(DOWNSTREAM_RETRY, "source" => label.to_string()).increment(1);

            self.sleeper.sleep(delay).await;
            outcome = attempt().await;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::FailureKind;
    use crate::testutils::RecordingSleeper;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    fn scripted(
        outcomes: Vec<CallOutcome<u32>>,
    ) -> (Arc<Mutex<VecDeque<CallOutcome<u32>>>>, Arc<Mutex<u32>>) {
        (
            Arc::new(Mutex::new(outcomes.into())),
            Arc::new(Mutex::new(0)),
        )
    }

    async fn run_scripted(
        policy: &RetryPolicy,
        outcomes: Vec<CallOutcome<u32>>,
    ) -> (CallOutcome<u32>, u32) {
        let (queue, calls) = scripted(outcomes);
        let outcome = policy
            .run("test", || {
                let queue = queue.clone();
                let calls = calls.clone();
                async move {
                    *calls.lock() += 1;
                    queue
                        .lock()
                        .pop_front()
                        .unwrap_or_else(|| CallOutcome::failure(FailureKind::Timeout, "exhausted"))
                }
            })
            .await;
        let attempts = *calls.lock();
        (outcome, attempts)
    }

    fn policy(sleeper: &Arc<RecordingSleeper>) -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1)).with_sleeper(sleeper.clone())
    }

    #[test]
    fn test_delay_for_retry() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(8));

        // Saturates rather than overflowing
        assert!(policy.delay_for_retry(40) >= Duration::from_secs(u32::MAX as u64));
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let (outcome, attempts) = run_scripted(
            &policy(&sleeper),
            vec![
                CallOutcome::failure(FailureKind::ServerError(503), "busy"),
                CallOutcome::failure(FailureKind::Timeout, "slow"),
                CallOutcome::Success(7),
            ],
        )
        .await;

        assert_eq!(outcome, CallOutcome::Success(7));
        assert_eq!(attempts, 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn test_success_returns_without_delay() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let (outcome, attempts) =
            run_scripted(&policy(&sleeper), vec![CallOutcome::Success(1)]).await;

        assert!(outcome.is_success());
        assert_eq!(attempts, 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let sleeper = Arc::new(RecordingSleeper::default());
        for kind in [FailureKind::ClientError(404), FailureKind::DecodeError] {
            let (outcome, attempts) = run_scripted(
                &policy(&sleeper),
                vec![CallOutcome::failure(kind, "nope"), CallOutcome::Success(1)],
            )
            .await;

            assert_eq!(outcome, CallOutcome::failure(kind, "nope"));
            assert_eq!(attempts, 1);
        }
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_failure() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let (outcome, attempts) = run_scripted(
            &policy(&sleeper),
            vec![
                CallOutcome::failure(FailureKind::ConnectionError, "refused"),
                CallOutcome::failure(FailureKind::RateLimited, "slow down"),
                CallOutcome::failure(FailureKind::ServerError(500), "boom"),
                CallOutcome::failure(FailureKind::ServerError(502), "last"),
                CallOutcome::Success(1),
            ],
        )
        .await;

        // One initial attempt plus three retries, never a fifth
        assert_eq!(attempts, 4);
        assert_eq!(
            outcome,
            CallOutcome::failure(FailureKind::ServerError(502), "last")
        );
        assert_eq!(
            sleeper.delays(),
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_retries() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let policy = RetryPolicy::new(0, Duration::from_secs(1)).with_sleeper(sleeper.clone());
        let (outcome, attempts) = run_scripted(
            &policy,
            vec![
                CallOutcome::failure(FailureKind::Timeout, "slow"),
                CallOutcome::Success(1),
            ],
        )
        .await;

        assert!(outcome.is_transient_failure());
        assert_eq!(attempts, 1);
        assert!(sleeper.delays().is_empty());
    }
}
