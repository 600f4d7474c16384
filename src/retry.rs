//! Retry with exponential backoff, jitter and per-attempt timeouts.
//!
//! [`retry`] wraps any fallible async operation. The LLM client and the HTTP
//! transport both go through it, so every outbound call shares one policy
//! shape:
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::{Rng, rng};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, warn};

/// How many times to try, how long to wait between tries, and how long a
/// single try may take.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: usize,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on jitter added to each delay.
    pub max_jitter: Duration,
    /// Time budget for one attempt; `None` leaves it to the operation.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            ..Self::default()
        }
    }

    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    /// Backoff before attempt `attempt + 1`, without jitter.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(1 << exp).min(self.max_delay)
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// Returns the last error once attempts are exhausted. `label` only shows up
/// in logs.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let total_t0 = Instant::now();
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        let attempt_t0 = Instant::now();
        let outcome = match policy.attempt_timeout {
            Some(limit) => match timeout(limit, op()).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout(limit)),
            },
            None => op().await,
        };

        let e = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            error!(
                label,
                attempt,
                max = max_attempts,
                elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                error = %e,
                "exhausted retries"
            );
            return Err(e);
        }

        let jitter_cap = policy.max_jitter.as_millis() as u64;
        let jitter_ms: u64 = if jitter_cap == 0 {
            0
        } else {
            rng().random_range(0..=jitter_cap)
        };
        let delay = policy.backoff(attempt) + Duration::from_millis(jitter_ms);

        warn!(
            label,
            attempt,
            max = max_attempts,
            elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
            ?delay,
            error = %e,
            "attempt failed; backing off"
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
            attempt_timeout: None,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(4));
        assert_eq!(p.backoff(4), Duration::from_secs(5));
        assert_eq!(p.backoff(60), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let out = retry(&fast(3), "test", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::Malformed("flaky".into()))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let res: Result<()> = retry(&fast(2), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Malformed("always".into()))
        })
        .await;
        assert!(matches!(res, Err(Error::Malformed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let _: Result<()> = retry(&fast(0), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Malformed("x".into()))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let policy = fast(1).with_attempt_timeout(Duration::from_millis(10));
        let res: Result<()> = retry(&policy, "test", || async {
            sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(Error::Timeout(_))));
    }
}
