//! Timeout and retry helpers for collaborator calls.
//!
//! Every store and blob call runs under [`with_timeout`], which turns an
//! elapsed deadline into a [`LifecycleError::Transient`]. The engine does not
//! retry on its own except through [`with_retry`], used for the master record
//! lookup during revocation.
//!
//! # Backoff Strategy
//!
//! - Base delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - Random jitter of 0–50% of the capped delay is added

use std::{future::Future, time::Duration};

use rand::Rng;

use crate::{
    config::RetryPolicyConfig,
    error::{LifecycleError, Result},
};

/// Runs `future` with a deadline of `timeout`.
///
/// # Errors
///
/// Returns the future's own error, or [`LifecycleError::Transient`] naming
/// `operation` if the deadline elapses first.
pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    operation: &'static str,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::warn!(operation, timeout_ms = timeout.as_millis() as u64, "operation timed out");
            Err(LifecycleError::transient(operation))
        },
    }
}

/// Runs `operation`, retrying transient failures per `policy`.
///
/// Returns the first success, the first non-transient error, or the last
/// transient error once retries are exhausted.
#[tracing::instrument(skip(policy, operation), fields(max_retries = policy.max_retries))]
pub(crate) async fn with_retry<F, Fut, T>(
    policy: &RetryPolicyConfig,
    operation_name: &'static str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = compute_backoff(policy, attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying",
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(err) => {
                if err.is_transient() {
                    tracing::warn!(attempts = attempt + 1, "retries exhausted");
                }
                return Err(err);
            },
        }
    }
}

/// Computes the delay before retry number `attempt + 1`.
///
/// `min(initial_backoff * 2^attempt, max_backoff) + random(0..50% of delay)`
pub(crate) fn compute_backoff(policy: &RetryPolicyConfig, attempt: u32) -> Duration {
    let base = policy.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(policy.max_backoff);

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        capped + Duration::from_millis(rand::rng().random_range(0..=jitter_range))
    } else {
        capped
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_retries: u32) -> RetryPolicyConfig {
        RetryPolicyConfig::builder()
            .max_retries(max_retries)
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_secs(1))
            .build()
    }

    #[test]
    fn test_compute_backoff_exponential() {
        let policy = policy(5);

        let d0 = compute_backoff(&policy, 0);
        assert!(d0 >= Duration::from_millis(100) && d0 <= Duration::from_millis(150));

        let d2 = compute_backoff(&policy, 2);
        assert!(d2 >= Duration::from_millis(400) && d2 <= Duration::from_millis(600));
    }

    #[test]
    fn test_compute_backoff_capped() {
        let d = compute_backoff(&policy(10), 12);
        assert!(d >= Duration::from_secs(1));
        assert!(d <= Duration::from_millis(1500));
    }

    #[test]
    fn test_compute_backoff_zero_initial() {
        let policy = RetryPolicyConfig::builder().initial_backoff(Duration::ZERO).build();
        assert_eq!(compute_backoff(&policy, 3), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(3), "lookup", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(LifecycleError::transient("lookup")) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_returns_last_transient() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&policy(2), "lookup", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LifecycleError::transient("lookup")) }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_permanent() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&policy(5), "lookup", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LifecycleError::forbidden("no")) }
        })
        .await;

        assert!(matches!(result, Err(LifecycleError::Forbidden { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let result: Result<()> = with_timeout(Duration::from_millis(50), "find_latest", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(LifecycleError::Transient { operation, .. }) => assert_eq!(operation, "find_latest"),
            other => panic!("expected Transient, got: {other:?}"),
        }
    }
}
