//! Retry and backoff policies
//!
//! Shared by the oracle call path and the provisioning provider calls:
//! - `RetryPolicy`: bounded attempts, exponential backoff with full jitter,
//!   pluggable retryable predicate
//! - `Backoff`: a plain interval iterator (initial, multiplier, cap) used
//!   for readiness polling

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded retry policy with exponential backoff and full jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    /// Create a policy with the given attempt cap
    ///
    /// Defaults: 250 ms initial delay, 2.0 multiplier, 10 s cap, jitter on.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(250),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }

    /// With initial delay
    #[inline]
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// With backoff multiplier
    #[inline]
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// With delay cap
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, cap: Duration) -> Self {
        self.max_delay = cap;
        self
    }

    /// Disable jitter (deterministic delays, mainly for tests)
    #[inline]
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Maximum number of attempts (always >= 1)
    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry following `attempt` (1-based)
    ///
    /// The un-jittered delay grows exponentially and never exceeds the cap;
    /// with jitter on, a uniform value in `[0, delay]` is drawn.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        if self.jitter {
            let drawn = rand::rng().random_range(0.0..=capped);
            Duration::from_secs_f64(drawn)
        } else {
            Duration::from_secs_f64(capped)
        }
    }

    /// Run `op` until it succeeds, a non-retryable error occurs, or
    /// attempts are exhausted
    ///
    /// The predicate decides whether an error is worth retrying; the final
    /// error is returned unchanged.
    pub async fn run<T, E, F, Fut, P>(&self, is_retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && is_retryable(&err) => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Unbounded exponential interval sequence for polling loops
///
/// Callers bound it externally (elapsed-time deadline); the iterator never
/// terminates on its own.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    multiplier: f64,
    cap: Duration,
}

impl Backoff {
    /// Create a backoff sequence
    #[must_use]
    pub fn new(initial: Duration, multiplier: f64, cap: Duration) -> Self {
        Self {
            next: initial.min(cap),
            multiplier: multiplier.max(1.0),
            cap,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let grown = current.as_secs_f64() * self.multiplier;
        self.next = Duration::from_secs_f64(grown.min(self.cap.as_secs_f64()));
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn deterministic_delays_grow_and_cap() {
        let policy = RetryPolicy::new(6)
            .with_initial_delay(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_millis(500))
            .without_jitter();

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn run_stops_after_max_attempts() {
        let policy = RetryPolicy::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .without_jitter();
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = policy
            .run(
                |_| true,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("boom".to_string()) }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_does_not_retry_fatal_errors() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_millis(1))
            .without_jitter();
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = policy
            .run(
                |_| false,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("fatal".to_string()) }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_returns_first_success() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_millis(1))
            .without_jitter();
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run(
                |_| true,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("transient".to_string())
                        } else {
                            Ok(n)
                        }
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_sequence_caps() {
        let intervals: Vec<_> = Backoff::new(Duration::from_secs(1), 3.0, Duration::from_secs(5))
            .take(4)
            .collect();
        assert_eq!(
            intervals,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
    }

    proptest! {
        #[test]
        fn jittered_delay_never_exceeds_cap(attempt in 1u32..64, cap_ms in 1u64..5_000) {
            let policy = RetryPolicy::new(8)
                .with_initial_delay(Duration::from_millis(50))
                .with_max_delay(Duration::from_millis(cap_ms));
            let delay = policy.delay_for(attempt);
            prop_assert!(delay <= Duration::from_millis(cap_ms));
        }
    }
}
