//! Jittered exponential backoff between kubectl attempts.

use std::time::Duration;

use rand::Rng;

/// Exponential window that doubles per attempt and is capped at `max`.
/// The delay after attempt `k` is drawn uniformly from `[window(k), window(k + 1)]`, so a later
/// attempt never waits less than an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), max: Duration::from_secs(16) }
    }
}

impl BackoffPolicy {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// No waiting at all; handy for tests and dry paths.
    pub const fn none() -> Self {
        Self { base: Duration::ZERO, max: Duration::ZERO }
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// Lower bound of the delay after the `attempt`-th failure (1-based).
    pub fn window(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }

    /// Delay for `attempt` given a jitter fraction in `[0, 1]`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let floor = self.window(attempt);
        let ceiling = self.window(attempt.saturating_add(1));
        let jitter = jitter.clamp(0.0, 1.0);
        (floor + (ceiling - floor).mul_f64(jitter)).min(self.max)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::thread_rng().gen();
        self.delay_with_jitter(attempt, jitter)
    }
}
