//! # Daybook Resilience
//!
//! Resilience primitives used by the Daybook journal client:
//!
//! - **Circuit Breaker**: Stop attempts to a failing backend for a cool-down
//! - **Backoff**: Exponential delays with optional jitter and cap
//! - **Classification**: Map raw failures to a typed kind and retry verdict
//! - **Timeouts**: Race a single attempt against a timer
//! - **Clock**: Injectable time source for deterministic tests
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use daybook_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::time::Duration;
//!
//! let cb = CircuitBreaker::new(
//!     CircuitBreakerConfig::new("journal_api")
//!         .with_failure_threshold(3)
//!         .with_reset_timeout(Duration::from_secs(60)),
//! );
//!
//! assert!(cb.can_request());
//! for _ in 0..3 {
//!     cb.record_failure();
//! }
//! assert_eq!(cb.state(), CircuitState::Open);
//! assert!(!cb.can_request());
//! ```
//!
//! ## Backoff
//!
//! ```rust
//! use daybook_resilience::{BackoffConfig, BackoffPolicy};
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::new(BackoffConfig::reconnect(Duration::from_secs(1)));
//! assert_eq!(policy.delay(3), Duration::from_secs(8));
//! ```
//!
//! ## Classification
//!
//! ```rust
//! use daybook_resilience::{ErrorClassifier, Failure};
//! use daybook_error::ErrorKind;
//!
//! let verdict = ErrorClassifier::classify(&Failure::Status { status: 503, message: String::new() });
//! assert_eq!(verdict.kind, ErrorKind::Server);
//! assert!(verdict.retryable);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod clock;
pub mod timeout;

pub use backoff::{BackoffConfig, BackoffPolicy};

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitOpenError, Permit,
};

pub use classify::{Classification, ErrorClassifier, Failure};

pub use clock::{Clock, ManualClock, SystemClock};

pub use daybook_error::CircuitState;

pub use timeout::{attempt_timeout, with_timeout, TimeoutError};
