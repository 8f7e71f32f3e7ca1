//! Backoff schedules and request retries.
//!
//! A [`Backoff`] maps a count of consecutive failures to a delay. The save
//! controller uses one to schedule the retry of a failed save episode;
//! [`with_retry_if`] uses one to repeat a single best-effort request in place.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Delay schedule after consecutive failures.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// `step × failures`
    Linear { step: Duration },
    /// `initial × multiplier^(failures - 1)`, capped at `max`
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    pub fn linear(step: Duration) -> Self {
        Backoff::Linear { step }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Backoff::Exponential {
            initial,
            multiplier: 2.0,
            max,
        }
    }

    /// Delay after the given number of consecutive failures (1-based).
    pub fn delay_for_failure(&self, failures: u32) -> Duration {
        let failures = failures.max(1);
        match self {
            Backoff::Linear { step } => step.saturating_mul(failures),
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let delay_ms =
                    initial.as_millis() as f64 * multiplier.powi((failures - 1) as i32);
                Duration::from_millis(delay_ms as u64).min(*max)
            }
        }
    }
}

/// Saves retry once a minute more per failure.
impl Default for Backoff {
    fn default() -> Self {
        Backoff::linear(Duration::from_secs(60))
    }
}

/// How often, and how patiently, a single request is repeated.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts including the first one; zero behaves like one
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Cross-wiki link after publishing: one more try, half a second later.
    pub fn link_call() -> Self {
        Self::new(
            2,
            Backoff::exponential(Duration::from_millis(500), Duration::from_secs(1)),
        )
    }

    /// Pause before the given attempt (0 = first attempt, no pause).
    fn pause_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.backoff.delay_for_failure(attempt)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::link_call()
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or runs out of attempts. The last error is returned.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let pause = config.pause_before(attempt);
        if !pause.is_zero() {
            debug!("{}: waiting {:?} before attempt {}", operation_name, pause, attempt + 1);
            sleep(pause).await;
        }

        let e = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{}: succeeded on attempt {}", operation_name, attempt + 1);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !should_retry(&e) {
            debug!("{}: giving up on permanent error: {}", operation_name, e);
            return Err(e);
        }
        if attempt + 1 >= attempts {
            warn!("{}: failed {} times, last error: {}", operation_name, attempts, e);
            return Err(e);
        }
        warn!(
            "{}: attempt {}/{} failed: {}",
            operation_name,
            attempt + 1,
            attempts,
            e
        );
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick(attempts: u32) -> RetryConfig {
        RetryConfig::new(
            attempts,
            Backoff::exponential(Duration::from_millis(10), Duration::from_secs(1)),
        )
    }

    /// Operation failing with "error N" on its first `failures` calls.
    fn flaky(
        calls: Arc<AtomicU32>,
        failures: u32,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, String>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < failures {
                Err(format!("error {}", n))
            } else {
                Ok(n)
            })
        }
    }

    // ==================== Backoff Tests ====================

    #[test]
    fn test_linear_default_is_a_minute_per_failure() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for_failure(1), Duration::from_secs(60));
        assert_eq!(backoff.delay_for_failure(2), Duration::from_secs(120));
        assert_eq!(backoff.delay_for_failure(5), Duration::from_secs(300));
    }

    #[test]
    fn test_exponential_doubles_up_to_max() {
        let backoff = Backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));
        assert_eq!(backoff.delay_for_failure(1), Duration::from_secs(10));
        assert_eq!(backoff.delay_for_failure(3), Duration::from_secs(40));
        assert_eq!(backoff.delay_for_failure(5), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_failures_counts_as_one() {
        let backoff = Backoff::linear(Duration::from_secs(5));
        assert_eq!(backoff.delay_for_failure(0), Duration::from_secs(5));
    }

    #[test]
    fn test_link_call_pauses() {
        let config = RetryConfig::link_call();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.pause_before(0), Duration::ZERO);
        assert_eq!(config.pause_before(1), Duration::from_millis(500));
        assert_eq!(config.pause_before(2), Duration::from_secs(1));
    }

    // ==================== with_retry_if Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_retryable_failure() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = with_retry_if(&quick(3), "test", flaky(calls.clone(), 1), |_| true).await;

        assert_eq!(tokio_test::assert_ok!(result), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_repeated() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = with_retry_if(&quick(3), "test", flaky(calls.clone(), 5), |e| {
            e != "error 0"
        })
        .await;

        assert_eq!(result.unwrap_err(), "error 0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_attempts_run_out() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = with_retry_if(&quick(3), "test", flaky(calls.clone(), 5), |_| true).await;

        assert_eq!(result.unwrap_err(), "error 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = with_retry_if(&quick(0), "test", flaky(calls.clone(), 5), |_| true).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pauses_follow_the_backoff() {
        let config = RetryConfig::new(
            3,
            Backoff::exponential(Duration::from_millis(100), Duration::from_secs(1)),
        );
        let start = tokio::time::Instant::now();

        let _ = with_retry_if(&config, "test", flaky(Arc::default(), 5), |_| true).await;

        // 100ms + 200ms of virtual time
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }
}
