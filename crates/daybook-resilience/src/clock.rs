//! Time source abstraction
//!
//! Everything time-dependent (breaker reset, backoff waits, reconnection
//! delays, queue pacing) goes through a [`Clock`] so tests can simulate
//! elapsed time without sleeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Source of monotonic time, wall time and sleeps
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic now
    fn now(&self) -> Instant;

    /// Wall-clock now, used for timestamps that leave the process
    fn wall_time(&self) -> DateTime<Utc>;

    /// Suspend for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by `tokio::time`
///
/// Honors `tokio::time::pause()`, so paused-runtime tests work with it too.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Shared handle to the system clock
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

/// Deterministic clock that only moves when told to.
///
/// `sleep` advances the clock by the requested duration, records it and
/// yields once, so code under test observes the wait without blocking.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    state: Mutex<ManualState>,
}

impl ManualClock {
    /// Create a clock starting at the current instant
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Create a clock whose wall time starts at `wall_origin`
    pub fn starting_at(wall_origin: DateTime<Utc>) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin,
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Move time forward
    pub fn advance(&self, duration: Duration) {
        self.lock().elapsed += duration;
    }

    /// Total simulated time since creation
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// Every duration passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall_time(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed()).unwrap_or(chrono::Duration::zero());
        self.wall_origin + elapsed
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.lock();
            state.elapsed += duration;
            state.sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}
