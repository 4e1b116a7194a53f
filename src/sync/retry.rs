use std::future::Future;
use std::time::Duration;

use crate::{Error, Result};

/// Capped-attempt exponential backoff for remote writes.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// A single attempt, failures propagate immediately.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay to wait after the `failed`-th failed attempt (1-based).
    pub fn delay_for_attempt(&self, failed: u32) -> Duration {
        if failed == 0 {
            return Duration::ZERO;
        }
        let secs = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(failed.saturating_sub(1) as i32);
        // A negative or NaN product falls back to the bounds.
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()).max(0.0))
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the attempt cap is
    /// reached. Before every retry `on_retry` receives the upcoming attempt number, the
    /// delay about to be slept and the error that caused it.
    pub async fn run<T, F, Fut, R>(&self, mut op: F, mut on_retry: R) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        R: FnMut(u32, Duration, &Error),
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && e.is_retryable() => {
                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    on_retry(attempt, delay, &e);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
