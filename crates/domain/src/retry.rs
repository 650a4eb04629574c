//! Retry and timeout combinators applied at service boundaries.
//!
//! The persistence layer and LLM callers wrap their operations in
//! [`with_retry`]; the turn executor wraps whole turns in [`with_timeout`].
//! Backoff is exponential with a deterministic ±jitter so retry storms from
//! concurrent sessions spread out without pulling in an RNG.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Exponential backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub factor: f64,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Jitter as a fraction of the computed delay (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Compute the backoff delay after the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let raw_ms = base_ms * self.factor.powi(attempt as i32);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);

        // Deterministic jitter in [-jitter, +jitter] spreads concurrent
        // retriers without an RNG dependency.
        let frac = pseudo_random_fraction(attempt);
        let jittered = capped_ms * (1.0 + self.jitter * (2.0 * frac - 1.0));
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Cheap deterministic "random" fraction [0, 1) from the attempt number.
/// Not cryptographically secure, just enough to de-synchronize retriers.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_add(1).wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}

/// Run `op` up to `policy.max_attempts` times, backing off between failures
/// that satisfy [`Error::is_retryable`].
///
/// A `deadline`, when given, is honored inside the loop: a backoff sleep
/// that would cross it is abandoned and the last error returned.
pub async fn with_retry<T, F, Fut>(
    op_name: &str,
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                if let Some(deadline) = deadline {
                    if Instant::now() + delay >= deadline {
                        tracing::warn!(
                            op = op_name,
                            attempt,
                            error = %e,
                            "abandoning retry: backoff would cross the deadline"
                        );
                        return Err(e);
                    }
                }
                tracing::debug!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run `fut` under a deadline; expiry maps to [`Error::HandlerTimeout`].
pub async fn with_timeout<T, Fut>(deadline: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::HandlerTimeout {
            seconds: deadline.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delay_grows_and_caps() {
        let p = RetryPolicy::default();
        let d0 = p.delay_for_attempt(0);
        let d1 = p.delay_for_attempt(1);
        // Base 500ms ±20% then 1000ms ±20%: monotone even with jitter.
        assert!(d1 > d0);
        // Far attempts stay within the cap plus jitter.
        let far = p.delay_for_attempt(10);
        assert!(far <= Duration::from_millis(6000));
    }

    #[test]
    fn jitter_stays_within_band() {
        let p = RetryPolicy::default();
        for attempt in 0..8 {
            let d = p.delay_for_attempt(attempt).as_millis() as f64;
            let nominal = (500.0 * 2f64.powi(attempt as i32)).min(5000.0);
            assert!(d >= nominal * 0.8 - 1.0, "attempt {attempt}: {d} too low");
            assert!(d <= nominal * 1.2 + 1.0, "attempt {attempt}: {d} too high");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = with_retry("test", &RetryPolicy::default(), None, move || {
            let calls = calls2.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Db("transient".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<()> =
            with_retry("test", &RetryPolicy::default(), None, move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::InvalidInput("bad".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_and_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<()> =
            with_retry("test", &RetryPolicy::default(), None, move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::StatePersistence("still down".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::StatePersistence(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn deadline_abandons_pending_retries() {
        let deadline = Instant::now(); // already expired
        let result: Result<()> = with_retry(
            "test",
            &RetryPolicy::default(),
            Some(deadline),
            || async { Err(Error::Db("transient".into())) },
        )
        .await;
        // First failure cannot back off without crossing the deadline.
        assert!(matches!(result, Err(Error::Db(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_handler_timeout() {
        let result: Result<()> = with_timeout(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::HandlerTimeout { seconds: 1 })));
    }
}
