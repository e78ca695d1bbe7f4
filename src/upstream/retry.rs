//! # Retry Policy
//!
//! Exponential back-off for transient upstream failures.
//!
//! The delay before retry `n` (`n >= 1`) is
//!
//! ```text
//! min(base_delay * 2^(n-1) + jitter, max_delay)
//! ```
//!
//! where jitter is a random fraction of the un-jittered delay. With the
//! defaults (1s base, 4s cap, 3 retries) a request is attempted at most four
//! times, waiting roughly 1s, 2s and 4s in between.

use crate::core::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Jitter added on top of the exponential delay
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// Exact delays, used by tests
    None,

    /// Uniform random extra in `[0, ratio * delay]`
    Proportional(f64),
}

impl Jitter {
    fn apply(self, delay: Duration) -> Duration {
        match self {
            Self::Proportional(ratio) if ratio > 0.0 && !delay.is_zero() => {
                let extra = rand::thread_rng().gen_range(0.0..=ratio);
                delay + delay.mul_f64(extra)
            }
            _ => delay,
        }
    }
}

/// Retry strategy for upstream requests
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Ceiling for any single delay, jitter included
    pub max_delay: Duration,

    /// Jitter strategy
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            jitter: if config.jitter_ratio > 0.0 {
                Jitter::Proportional(config.jitter_ratio)
            } else {
                Jitter::None
            },
        }
    }
}

impl RetryPolicy {
    /// Create a policy with proportional jitter of 10%
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: Jitter::Proportional(0.1),
        }
    }

    /// Retry without waiting
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Jitter::None,
        }
    }

    /// Never retry
    pub fn no_retry() -> Self {
        Self::immediate(0)
    }

    /// Replace the jitter strategy
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total number of attempts, the first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Exponential delay before retry `retry` without jitter
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent);

        factor
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Delay before retry `retry` (1-based), jitter included
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.jitter.apply(self.backoff_for(retry)).min(self.max_delay)
    }
}

/// Per-request retry bookkeeping, discarded when the request completes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far
    pub attempt: u32,

    /// Delay chosen before the upcoming attempt
    pub next_delay: Duration,
}

impl RetryState {
    /// State before the first attempt
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed attempt and return the delay before the next one,
    /// or `None` once the policy is exhausted
    pub fn next_backoff(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        self.attempt += 1;

        if self.attempt > policy.max_retries {
            return None;
        }

        self.next_delay = policy.delay_for_retry(self.attempt);
        Some(self.next_delay)
    }
}
