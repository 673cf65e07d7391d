//! Retry delay policy.

use std::time::Duration;

use filehub_core::config::{BackoffConfig, BackoffStrategy};

/// Computes the delay before the next attempt of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    strategy: BackoffStrategy,
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base: delay,
            max: delay,
        }
    }

    /// `base · 2^(n-1)` for the n-th failure, capped at `max`.
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base,
            max: max.max(base),
        }
    }

    /// Delay after the `failure`-th failed execution (1-based).
    pub fn delay_for(&self, failure: i32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.base,
            BackoffStrategy::Exponential => {
                let exponent = failure.saturating_sub(1).clamp(0, 31) as u32;
                self.base
                    .checked_mul(1u32 << exponent)
                    .map_or(self.max, |delay| delay.min(self.max))
            }
        }
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        let base = Duration::from_secs(config.base_delay_seconds);
        match config.strategy {
            BackoffStrategy::Fixed => Self::fixed(base),
            BackoffStrategy::Exponential => {
                Self::exponential(base, Duration::from_secs(config.max_delay_seconds))
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}
