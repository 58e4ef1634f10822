//! Bounded fixed-interval polling
//!
//! There is no push channel from the store, so callers waiting on an
//! external asynchronous state transition (a table becoming active, a lock
//! record disappearing) trade latency for polling. Delays are a fixed
//! interval — never exponential, never jittered — and there is no
//! cancellation token: once a loop starts it settles on its own.

use std::future::Future;
use std::time::Duration;

/// A constant-delay retry budget.
///
/// `max_retries` counts retries after the initial attempt, so a probe runs
/// at most `max_retries + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed delay between attempts
    pub delay: Duration,
    /// Retries after the initial attempt
    pub max_retries: u32,
}

impl RetryPolicy {
    pub const fn new(delay: Duration, max_retries: u32) -> Self {
        Self { delay, max_retries }
    }

    /// Total attempts this policy allows
    pub const fn attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Poll `probe` until it returns a ready value.
///
/// `Err` from the probe means "condition not met yet": the poller sleeps
/// the policy's fixed delay and tries again, consuming one retry. When the
/// budget is exhausted, the most recent probe error is surfaced as the
/// failure.
pub async fn poll_until<T, E, F, Fut>(policy: RetryPolicy, mut probe: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut remaining = policy.max_retries;
    loop {
        match probe().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if remaining == 0 {
                    return Err(err);
                }
                remaining -= 1;
                tracing::debug!(
                    delay_ms = policy.delay.as_millis() as u64,
                    remaining,
                    "condition not met, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: RetryPolicy = RetryPolicy::new(Duration::from_millis(1), 3);

    #[tokio::test]
    async fn ready_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, StoreError> = poll_until(FAST, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ready_after_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, StoreError> = poll_until(FAST, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::store("not yet"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StoreError> = poll_until(FAST, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(StoreError::store(format!("attempt {n}"))) }
        })
        .await;

        // max_retries + 1 probes, and the failure is the last one's.
        assert_eq!(calls.load(Ordering::SeqCst), FAST.attempts());
        match result.unwrap_err() {
            StoreError::Store(msg) => assert_eq!(msg, "attempt 3"),
            other => panic!("expected Store error, got {other:?}"),
        }
    }
}
