//! Bounded waiting for eventually-consistent cluster state.
//!
//! [`wait_until`] polls a predicate at a fixed interval until it succeeds,
//! the timeout passes or the check is cancelled. On timeout the caller gets
//! the last error the predicate produced, not a generic "timed out".
//! [`retry`] repeats an operation a fixed number of times with a fixed delay.

use crate::context::{CheckContext, Phase};
use crate::error::CheckError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Why a wait ended without the condition holding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError<E> {
    /// Timeout passed
    TimedOut {
        /// Predicate evaluations performed
        attempts: u32,
        /// Time spent waiting
        elapsed: Duration,
        /// Last predicate error, if any evaluation finished
        last: Option<E>,
    },
    /// The check was cancelled
    Cancelled {
        /// Predicate evaluations performed
        attempts: u32,
        /// Last predicate error, if any
        last: Option<E>,
    },
}

impl<E> WaitError<E> {
    /// Last predicate error observed.
    pub fn last(&self) -> Option<&E> {
        match self {
            WaitError::TimedOut { last, .. } | WaitError::Cancelled { last, .. } => last.as_ref(),
        }
    }

    /// Predicate evaluations performed.
    pub fn attempts(&self) -> u32 {
        match self {
            WaitError::TimedOut { attempts, .. } | WaitError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }
}

impl<E: Display> WaitError<E> {
    /// Convert into a check failure describing `what` was awaited.
    pub fn into_check_error(self, what: &str) -> CheckError {
        match self {
            WaitError::TimedOut {
                attempts,
                elapsed,
                last,
            } => CheckError::WaitTimeout {
                what: what.to_string(),
                attempts,
                elapsed,
                last: last.map(|e| e.to_string()),
            },
            WaitError::Cancelled { .. } => CheckError::Cancelled,
        }
    }
}

/// Poll `predicate` every `poll_interval` until it returns `Ok`.
///
/// Errors from the predicate mean "not yet" and are kept as the diagnostic.
/// Each evaluation is bounded by the same deadline as the wait, and the wait
/// never outlives the check's own deadline. Returns the number of
/// evaluations on success.
pub async fn wait_until<F, Fut, E>(
    ctx: &CheckContext,
    timeout: Duration,
    poll_interval: Duration,
    mut predicate: F,
) -> Result<u32, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let started = Instant::now();
    let deadline = match ctx.deadline() {
        Some(check_deadline) => (started + timeout).min(check_deadline),
        None => started + timeout,
    };
    let cancel = ctx.cancellation();
    let mut attempts: u32 = 0;
    let mut last: Option<E> = None;
    ctx.advance(Phase::Waiting);

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled { attempts, last });
        }
        attempts += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(WaitError::Cancelled { attempts, last });
            }
            outcome = tokio::time::timeout_at(deadline, predicate()) => outcome,
        };
        match outcome {
            Ok(Ok(())) => {
                tracing::debug!(check = ctx.check_name(), attempts, "Condition met");
                return Ok(attempts);
            }
            Ok(Err(e)) => {
                tracing::debug!(check = ctx.check_name(), attempts, error = %e, "Condition not met yet");
                last = Some(e);
            }
            Err(_) => {
                return Err(WaitError::TimedOut {
                    attempts,
                    elapsed: started.elapsed(),
                    last,
                });
            }
        }

        let next_poll = (Instant::now() + poll_interval).min(deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(WaitError::Cancelled { attempts, last });
            }
            _ = tokio::time::sleep_until(next_poll) => {}
        }
        if Instant::now() >= deadline {
            return Err(WaitError::TimedOut {
                attempts,
                elapsed: started.elapsed(),
                last,
            });
        }
    }
}

/// Fixed retry count and delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// Only retryable failures are repeated; the last failure is returned.
pub async fn retry<T, F, Fut>(
    ctx: &CheckContext,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, CheckError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CheckError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.retries => {
                attempt += 1;
                tracing::debug!(
                    check = ctx.check_name(),
                    attempt,
                    retries = policy.retries,
                    error = %e,
                    "Retrying"
                );
                ctx.sleep(policy.delay).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertions::AssertionFailure;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_poll() {
        let ctx = CheckContext::new("wait", 1);
        let calls = AtomicU32::new(0);
        let attempts = wait_until(&ctx, Duration::from_secs(10), Duration::from_secs(1), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("not yet")
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(ctx.phase(), Phase::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_last_predicate_error() {
        let ctx = CheckContext::new("wait", 1);
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let err = wait_until(&ctx, Duration::from_secs(3), Duration::from_secs(1), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), String>(format!("attempt {n} failed"))
        })
        .await
        .unwrap_err();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed <= Duration::from_secs(4));
        let attempts = err.attempts();
        assert_eq!(err.last(), Some(&format!("attempt {} failed", attempts - 1)));
        assert!(matches!(err, WaitError::TimedOut { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_predicate_is_cut_at_deadline() {
        let ctx = CheckContext::new("wait", 1);
        let started = Instant::now();
        let err = wait_until(&ctx, Duration::from_secs(2), Duration::from_millis(100), || {
            std::future::pending::<Result<(), String>>()
        })
        .await
        .unwrap_err();
        assert!(started.elapsed() <= Duration::from_millis(2_100));
        assert_eq!(err.last(), None);
        assert_eq!(err.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_evaluates_once() {
        let ctx = CheckContext::new("wait", 1);
        let attempts = wait_until(&ctx, Duration::ZERO, Duration::from_secs(1), || async {
            Ok::<(), String>(())
        })
        .await
        .unwrap();
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_immediately() {
        let token = CancellationToken::new();
        let ctx = CheckContext::new("wait", 1).with_cancellation(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            token.cancel();
        });
        let started = Instant::now();
        let err = wait_until(&ctx, Duration::from_secs(60), Duration::from_secs(1), || async {
            Err::<(), &str>("pending")
        })
        .await
        .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(err, WaitError::Cancelled { .. }));
        assert_eq!(err.last(), Some(&"pending"));
        assert!(matches!(err.into_check_error("x"), CheckError::Cancelled));
        canceller.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn check_deadline_caps_wait() {
        let ctx = CheckContext::new("wait", 1).with_timeout(Duration::from_secs(1));
        let started = Instant::now();
        let err = wait_until(&ctx, Duration::from_secs(60), Duration::from_millis(200), || async {
            Err::<(), &str>("pending")
        })
        .await
        .unwrap_err();
        assert!(started.elapsed() <= Duration::from_millis(1_200));
        match err.into_check_error("replication") {
            CheckError::WaitTimeout { what, last, .. } => {
                assert_eq!(what, "replication");
                assert_eq!(last.as_deref(), Some("pending"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_until_success() {
        let ctx = CheckContext::new("retry", 1);
        let calls = AtomicU32::new(0);
        let value = retry(&ctx, RetryPolicy::new(5, Duration::from_secs(1)), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CheckError::from(AssertionFailure::new("held", true, false)))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_returns_last_error() {
        let ctx = CheckContext::new("retry", 1);
        let calls = AtomicU32::new(0);
        let err = retry(&ctx, RetryPolicy::new(2, Duration::from_secs(1)), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CheckError::from(AssertionFailure::new("held", "attempt", n)))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            CheckError::Assertion(failure) => assert_eq!(failure.observed, "2"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn retry_stops_on_input_error() {
        let ctx = CheckContext::new("retry", 1);
        let calls = AtomicU32::new(0);
        let err = retry(&ctx, RetryPolicy::new(5, Duration::from_millis(1)), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CheckError::from(keeper_types::AddressError::EmptyCandidateSet))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, CheckError::Address(_)));
    }
}
