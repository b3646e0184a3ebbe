//! Retry and polling policies.
//
// Readout paths (PIN after a fire, temperature after a probe read) all wait
// for text to show up in the buffer. They share `PollBudget`, which bounds
// the wait, so "nothing yet" and "gave up" are distinct from a bad readout.

use crate::error::{TellieError, TellieResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// The maximum number of attempts.
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// Configuration and state errors are returned immediately; retrying them
/// cannot help.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> TellieResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TellieResult<T>>,
{
    let mut last_error = None;
    for attempt in 1..=policy.max_attempts.max(1) {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_rejection() => return Err(e),
            Err(e) => {
                tracing::debug!(attempt, error = %e, "Attempt failed");
                last_error = Some(e);
            }
        }
        if attempt < policy.max_attempts {
            sleep(policy.backoff_delay).await;
        }
    }
    Err(last_error.unwrap_or_else(|| {
        TellieError::Timeout(format!(
            "Failed after {} attempts",
            policy.max_attempts
        ))
    }))
}

/// Result of a bounded poll: the value, or nothing yet.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Pending,
    Ready(T),
}

/// Time budget for a readout poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    interval: Duration,
    deadline: Instant,
}

impl PollBudget {
    pub fn start(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            deadline: Instant::now() + timeout,
        }
    }

    /// Sleep one interval. Returns false, without sleeping, once the deadline
    /// has passed.
    pub async fn next(&self) -> bool {
        let now = Instant::now();
        if now >= self.deadline {
            return false;
        }
        sleep(self.interval.min(self.deadline - now)).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_logic_succeeds() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(10),
        };
        let result = retry(&policy, || async {
            if attempts.fetch_add(1, Ordering::SeqCst) + 1 >= 2 {
                Ok(7)
            } else {
                Err(TellieError::WorkerGone)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_logic_fails() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(10),
        };
        let result: TellieResult<()> = retry(&policy, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(TellieError::WorkerGone)
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_rejection() {
        let attempts = AtomicU32::new(0);
        let result: TellieResult<()> = retry(&RetryPolicy::default(), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(TellieError::State("firing".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_budget_expires() {
        let budget = PollBudget::start(Duration::from_millis(5), Duration::from_millis(20));
        let mut rounds = 0;
        while budget.next().await {
            rounds += 1;
            assert!(rounds < 100, "budget never expired");
        }
        assert!(rounds >= 1);
    }
}
