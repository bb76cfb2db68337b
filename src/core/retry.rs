//! Exponential backoff with jitter for transient failures.

use std::time::Duration;

use rand::Rng;

use crate::core::error::ErrorKind;

/// Controls how many times, and how patiently, a failed call is repeated.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry, before jitter.
    pub initial_backoff: Duration,
    /// Growth factor applied per retry. Values below 1 are treated as 1.
    pub backoff_multiplier: f64,
    /// Upper bound of any single delay, after jitter.
    pub max_backoff: Duration,
    /// The delay is scaled by a random factor in `[1 - jitter, 1 + jitter]`.
    pub jitter_factor: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

impl RetryOptions {
    /// A single attempt and no waiting. Deterministic.
    pub fn no_backoff() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_backoff: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Whether a failure of `kind` on zero-based `attempt` should be repeated.
    pub fn should_retry(&self, attempt: u32, kind: ErrorKind) -> bool {
        attempt < self.options.max_retries && kind.is_transient()
    }

    /// The wait before the retry that follows zero-based `attempt`.
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let opts = &self.options;
        if opts.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let max = opts.max_backoff.as_secs_f64();
        let multiplier = opts.backoff_multiplier.max(1.0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = (opts.initial_backoff.as_secs_f64() * multiplier.powi(exponent)).min(max);

        let jitter = opts.jitter_factor.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 && base > 0.0 {
            base * rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter))
        } else {
            base
        };

        Duration::try_from_secs_f64(delay.clamp(0.0, max)).unwrap_or(opts.max_backoff)
    }

    /// Like [`compute_delay`](Self::compute_delay), but waits at least
    /// `retry_after` when the server asked for it. Still capped.
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.compute_delay(attempt);
        match retry_after {
            Some(hint) => delay.max(hint).min(self.options.max_backoff),
            None => delay,
        }
    }
}
