//! Exponential backoff for transient provider failures

use crate::cancel::CancelSignal;
use crate::error::ProvisionResult;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry ceiling and backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently or runs out of attempts
    ///
    /// Only retryable errors are retried. Returns the outcome together with
    /// the number of attempts made.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancelSignal,
        mut op: F,
    ) -> (ProvisionResult<T>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ProvisionResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = %operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    if let Err(cancelled) = cancel.sleep(delay).await {
                        return (Err(cancelled), attempt);
                    }
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(operation = %operation, attempt, "Retry attempts exhausted");
                    }
                    return (Err(e), attempt);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelHandle;
    use crate::error::ProvisionError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient(message: &str) -> ProvisionError {
        ProvisionError::TransientProvider(message.to_string())
    }

    #[test]
    fn test_delay_curve() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (result, attempts) = RetryPolicy::default()
            .run("create_cluster", &CancelSignal::never(), move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient("throttled"))
                } else {
                    Ok("created")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "created");
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let (result, attempts) = policy
            .run("create_cluster", &CancelSignal::never(), |_| async {
                Err::<(), _>(transient("503"))
            })
            .await;

        assert!(matches!(result, Err(ProvisionError::TransientProvider(_))));
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let (result, attempts) = RetryPolicy::default()
            .run("create_cluster", &CancelSignal::never(), |_| async {
                Err::<(), _>(ProvisionError::ClusterCreation("quota".into()))
            })
            .await;

        assert!(matches!(result, Err(ProvisionError::ClusterCreation(_))));
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let handle = CancelHandle::new();
        handle.cancel();

        let (result, attempts) = RetryPolicy::default()
            .run("create_cluster", &handle.signal(), |_| async {
                Err::<(), _>(transient("503"))
            })
            .await;

        assert!(matches!(result, Err(ProvisionError::Cancelled)));
        assert_eq!(attempts, 1);
    }
}
