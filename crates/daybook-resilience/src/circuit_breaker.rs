//! Circuit breaker pattern implementation
//!
//! Stops request attempts to a failing backend for a cool-down period.
//! One breaker is shared by every call a client makes, so a failure in one
//! logical call gates unrelated calls too.

use crate::clock::{Clock, SystemClock};
use daybook_error::CircuitState;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Time since the last failure before a probe is allowed
    pub reset_timeout: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            name: "default".to_string(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set reset timeout
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    /// Id of the half-open probe currently holding the slot
    probe: Option<u64>,
    probes_issued: u64,
}

impl BreakerState {
    fn take_probe(&mut self) -> u64 {
        self.probes_issued = self.probes_issued.wrapping_add(1);
        self.probe = Some(self.probes_issued);
        self.probes_issued
    }
}

/// Circuit breaker for preventing cascading failures
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

/// Error when circuit is open
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Circuit '{name}' is {state}, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    /// Name of the circuit breaker
    pub name: String,
    /// State that refused the attempt
    pub state: CircuitState,
    /// Time until a probe may be allowed
    pub retry_after: Duration,
}

impl CircuitBreaker {
    /// Create a new circuit breaker on the system clock
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Create a new circuit breaker on the given clock
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe: None,
                probes_issued: 0,
            }),
        }
    }

    /// Create with default config and name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::new(CircuitBreakerConfig::new(name))
    }

    /// The breaker's configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Gate for a single attempt; must be asked before every attempt.
    pub fn can_request(&self) -> bool {
        self.check().is_ok()
    }

    /// Like [`can_request`](Self::can_request) but explains a refusal.
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open and
    /// admits exactly one probe; further calls are refused until that probe's
    /// outcome is recorded.
    ///
    /// The slot stays taken until an outcome is recorded or
    /// [`release_probe`](Self::release_probe) is called. Prefer
    /// [`admit`](Self::admit) when the attempt can be cancelled.
    pub fn check(&self) -> Result<(), CircuitOpenError> {
        self.acquire().map(|_| ())
    }

    /// Gate for an attempt that may be dropped before it finishes.
    ///
    /// The returned [`Permit`] gives a half-open probe slot back when it is
    /// dropped without an outcome having been recorded, so a cancelled probe
    /// cannot leave the circuit stuck in half-open.
    pub fn admit(&self) -> Result<Permit<'_>, CircuitOpenError> {
        self.acquire().map(|probe| Permit {
            breaker: self,
            probe,
        })
    }

    fn acquire(&self) -> Result<Option<u64>, CircuitOpenError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(None),
            CircuitState::HalfOpen => {
                if inner.probe.is_some() {
                    Err(self.open_error(&inner, CircuitState::HalfOpen))
                } else {
                    Ok(Some(inner.take_probe()))
                }
            }
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| self.clock.now().saturating_duration_since(at))
                    .unwrap_or(self.config.reset_timeout);
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    let probe = inner.take_probe();
                    tracing::info!(
                        circuit = %self.config.name,
                        "Circuit half-open, allowing probe"
                    );
                    Ok(Some(probe))
                } else {
                    Err(self.open_error(&inner, CircuitState::Open))
                }
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(
                circuit = %self.config.name,
                "Circuit closed after successful recovery"
            );
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.probe = None;
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(self.clock.now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        circuit = %self.config.name,
                        failures = inner.failure_count,
                        "Circuit opened due to failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.probe = None;
                tracing::warn!(
                    circuit = %self.config.name,
                    "Circuit reopened after half-open failure"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Give back a half-open probe whose outcome says nothing about the
    /// backend's health (e.g. a validation failure), so another probe may run.
    pub fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe = None;
        }
    }

    fn abandon_probe(&self, probe: u64) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe == Some(probe) {
            inner.probe = None;
            tracing::debug!(
                circuit = %self.config.name,
                "Half-open probe abandoned, slot released"
            );
        }
    }

    /// Get metrics
    pub fn metrics(&self) -> CircuitMetrics {
        let inner = self.lock();
        CircuitMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
        }
    }

    /// Force close the circuit (for testing/admin)
    pub fn force_close(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.probe = None;
    }

    /// Force open the circuit (for testing/admin)
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Open;
        inner.last_failure = Some(self.clock.now());
        inner.probe = None;
    }

    fn open_error(&self, inner: &BreakerState, state: CircuitState) -> CircuitOpenError {
        let elapsed = inner
            .last_failure
            .map(|at| self.clock.now().saturating_duration_since(at))
            .unwrap_or_default();
        CircuitOpenError {
            name: self.config.name.clone(),
            state,
            retry_after: self.config.reset_timeout.saturating_sub(elapsed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Admission to one attempt, from [`CircuitBreaker::admit`]
#[must_use = "dropping the permit ends the attempt"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: Option<u64>,
}

impl Permit<'_> {
    /// True if this attempt holds the half-open probe slot
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        // No-op once the probe's outcome has been recorded
        if let Some(probe) = self.probe {
            self.breaker.abandon_probe(probe);
        }
    }
}

/// Circuit breaker metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitMetrics {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures since the last success
    pub failure_count: u32,
    /// When the last failure was recorded
    pub last_failure: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(threshold: u32) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = CircuitBreakerConfig::new("test")
            .with_failure_threshold(threshold)
            .with_reset_timeout(Duration::from_secs(60));
        (CircuitBreaker::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::with_name("test");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_request());
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.reset_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_circuit_opens_after_failures() {
        let (cb, _) = breaker(3);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_request());
    }

    #[test]
    fn test_circuit_rejects_until_reset_timeout() {
        let (cb, clock) = breaker(1);
        cb.record_failure();

        clock.advance(Duration::from_secs(59));
        let err = cb.check().unwrap_err();
        assert_eq!(err.state, CircuitState::Open);
        assert_eq!(err.retry_after, Duration::from_secs(1));
    }

    #[test]
    fn test_half_open_allows_exactly_one_probe() {
        let (cb, clock) = breaker(1);
        cb.record_failure();
        clock.advance(Duration::from_secs(60));

        assert!(cb.can_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.can_request());
        assert!(!cb.can_request());
    }

    #[test]
    fn test_half_open_success_closes() {
        let (cb, clock) = breaker(2);
        cb.record_failure();
        cb.record_failure();
        clock.advance(Duration::from_secs(61));

        assert!(cb.can_request());
        cb.record_success();

        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.failure_count, 0);
        assert!(cb.can_request());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (cb, clock) = breaker(1);
        cb.record_failure();
        clock.advance(Duration::from_secs(60));
        assert!(cb.can_request());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_request());

        // The reopen restarts the cool-down from the probe's failure
        clock.advance(Duration::from_secs(30));
        assert!(!cb.can_request());
        clock.advance(Duration::from_secs(30));
        assert!(cb.can_request());
    }

    #[test]
    fn test_released_probe_can_be_retaken() {
        let (cb, clock) = breaker(1);
        cb.record_failure();
        clock.advance(Duration::from_secs(60));

        assert!(cb.can_request());
        cb.release_probe();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_request());
        assert!(!cb.can_request());
    }

    #[test]
    fn test_dropped_permit_frees_half_open_slot() {
        let (cb, clock) = breaker(1);
        cb.record_failure();
        clock.advance(Duration::from_secs(60));

        let permit = cb.admit().unwrap();
        assert!(permit.is_probe());
        assert!(cb.admit().is_err());

        drop(permit);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let retaken = cb.admit().unwrap();
        assert!(retaken.is_probe());
    }

    #[test]
    fn test_permit_after_recorded_outcome_is_inert() {
        let (cb, clock) = breaker(1);
        cb.record_failure();
        clock.advance(Duration::from_secs(60));

        let stale = cb.admit().unwrap();
        cb.record_failure();
        clock.advance(Duration::from_secs(60));

        // A newer probe owns the slot; dropping the old permit must not free it
        let current = cb.admit().unwrap();
        drop(stale);
        assert!(cb.admit().is_err());

        cb.record_success();
        drop(current);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_closed_permit_is_not_a_probe() {
        let cb = CircuitBreaker::with_name("test");
        let permit = cb.admit().unwrap();
        assert!(!permit.is_probe());
        drop(permit);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (cb, _) = breaker(3);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();

        assert_eq!(cb.metrics().failure_count, 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_force_open_and_close() {
        let cb = CircuitBreaker::with_name("test");
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_request());

        cb.force_close();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_request());
    }

    #[test]
    fn test_metrics() {
        let (cb, _) = breaker(5);
        cb.record_failure();
        cb.record_failure();

        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.failure_count, 2);
        assert!(metrics.last_failure.is_some());
    }
}
