// src/retry/backoff.rs

//! Delay computation for [`RetryPolicy`].
//!
//! The base delay for attempt `n` (0-indexed) is derived purely from `n`:
//!
//! - constant: `unit`
//! - exponential: `unit × 2^n`, clamped to `max_delay`
//!
//! A uniformly random jitter in `[0, jitter]` is added on top, so nodes that
//! hit the same transient failure at the same moment spread their retries.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Growth of the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Constant,
    Exponential,
}

impl Default for BackoffKind {
    fn default() -> Self {
        BackoffKind::Exponential
    }
}

/// Bounded retry policy: backoff shape plus overall time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub kind: BackoffKind,
    /// Base delay unit.
    pub unit: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub jitter: Duration,
    /// Cap for the exponential base delay (jitter is added after the cap).
    pub max_delay: Duration,
    /// Total time after which expected errors stop being retried.
    pub budget: Duration,
}

impl RetryPolicy {
    /// Constant backoff with a one second unit.
    pub fn constant(budget: Duration) -> Self {
        Self {
            kind: BackoffKind::Constant,
            unit: Duration::from_secs(1),
            jitter: Duration::ZERO,
            max_delay: Duration::from_secs(30),
            budget,
        }
    }

    /// Exponential backoff with a one second unit.
    pub fn exponential(budget: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            ..Self::constant(budget)
        }
    }

    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Base delay before attempt `attempt + 1`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match self.kind {
            BackoffKind::Constant => self.unit,
            BackoffKind::Exponential => {
                let max_secs = self.max_delay.as_secs_f64();
                let exp = attempt.min(i32::MAX as u32) as i32;
                let secs = self.unit.as_secs_f64() * 2f64.powi(exp);

                if !secs.is_finite() || secs < 0.0 || secs > max_secs {
                    self.max_delay
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }

    /// Full delay (base plus jitter) before attempt `attempt + 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + self.sample_jitter()
    }

    /// Largest delay [`delay`](Self::delay) can ever return for `attempt`.
    pub fn max_delay_for(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + self.jitter
    }

    fn sample_jitter(&self) -> Duration {
        let bound = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::rng().random_range(0..=bound))
    }
}
