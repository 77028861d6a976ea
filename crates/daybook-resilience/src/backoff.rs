//! Exponential backoff with jitter
//!
//! `delay(attempt) = min(base * 2^attempt + jitter, max)`, with jitter drawn
//! uniformly from `[0, jitter_bound)` on every call. Request retries and
//! socket reconnection each get their own policy.

use rand::Rng;
use std::time::Duration;

/// Backoff strategy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay for attempt 0
    pub base_delay: Duration,
    /// Cap applied to the jittered delay; `None` means uncapped
    pub max_delay: Option<Duration>,
    /// Exclusive upper bound of the random jitter
    pub jitter_bound: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::retry()
    }
}

impl BackoffConfig {
    /// Policy used between request retries: 1s base, 1s jitter, 10s cap
    pub fn retry() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Some(Duration::from_secs(10)),
            jitter_bound: Duration::from_secs(1),
        }
    }

    /// Policy used between socket reconnects: no jitter, no cap.
    ///
    /// The delay is bounded only by the reconnect attempt limit.
    pub fn reconnect(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: None,
            jitter_bound: Duration::ZERO,
        }
    }

    /// Set base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Remove the delay cap
    pub fn uncapped(mut self) -> Self {
        self.max_delay = None;
        self
    }

    /// Set jitter bound
    pub fn with_jitter(mut self, bound: Duration) -> Self {
        self.jitter_bound = bound;
        self
    }
}

/// Pure attempt-number to delay mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    /// Create a policy from config
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// The policy's configuration
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Deterministic part of the delay: `base * 2^attempt`, saturating.
    pub fn exponential(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.config.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Delay before the retry that follows `attempt`, with fresh jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = self.sample_jitter();
        self.delay_with_jitter(attempt, jitter)
    }

    /// Delay for `attempt` using a caller-supplied jitter value.
    ///
    /// `jitter` is clamped below `jitter_bound`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let jitter = if self.config.jitter_bound.is_zero() {
            Duration::ZERO
        } else {
            jitter.min(self.config.jitter_bound.saturating_sub(Duration::from_nanos(1)))
        };
        let delay = self.exponential(attempt).saturating_add(jitter);
        match self.config.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    fn sample_jitter(&self) -> Duration {
        let bound = self.config.jitter_bound.as_secs_f64();
        if bound <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..bound))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
