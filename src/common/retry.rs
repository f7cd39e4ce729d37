//! Bounded retry with exponential backoff
//!
//! `max_attempts` counts every attempt, the first one included. The delay
//! before attempt `n` (n >= 2) is `base_delay * 2^(n-2)`: 1, 2, 4, ... units.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Retry schedule invoked by the validator for each timeframe fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Result of a retried operation plus the number of attempts it took
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl<T, E> RetryOutcome<T, E> {
    /// Attempts beyond the first
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay to wait before the given 1-based attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.base_delay.saturating_mul(factor)
    }

    /// Total backoff spent when every attempt fails
    pub fn worst_case_delay(&self) -> Duration {
        (1..=self.max_attempts)
            .map(|a| self.delay_before(a))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Run `operation` until it succeeds or attempts are exhausted
    ///
    /// Every error is retried; classification is left to the caller's logs.
    pub async fn run<F, Fut, T, E>(&self, label: &str, mut operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                tracing::debug!("{}: retrying after {}ms", label, delay.as_millis());
                sleep(delay).await;
            }

            match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "{}: attempt {}/{} failed: {}",
                        label,
                        attempt,
                        self.max_attempts,
                        e
                    );
                    if attempt >= self.max_attempts {
                        return RetryOutcome {
                            result: Err(e),
                            attempts: attempt,
                        };
                    }
                }
            }

            attempt += 1;
        }
    }
}
