//! Exponential backoff.

use std::time::Duration;

use rand::Rng;

use crate::{DEFAULT_REQUEUE_BASE, DEFAULT_REQUEUE_MAX};

/// Exponential backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_REQUEUE_BASE,
            max: DEFAULT_REQUEUE_MAX,
            jitter: 0.0,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy without jitter.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: 0.0,
        }
    }

    /// Set the jitter factor, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for the given attempt number (0-based).
    ///
    /// The result never exceeds `max`, jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u128 << attempt.min(64);
        let nanos = self
            .base
            .as_nanos()
            .saturating_mul(factor)
            .min(self.max.as_nanos());
        let delay = Duration::from_nanos(nanos as u64);

        if self.jitter <= 0.0 {
            return delay;
        }

        let secs = delay.as_secs_f64();
        let spread = secs * self.jitter;
        let offset = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((secs + offset).clamp(0.0, self.max.as_secs_f64()))
    }
}
