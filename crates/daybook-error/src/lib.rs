//! # Daybook Error
//!
//! Unified error types for the Daybook journal client. Every failure that
//! leaves the network layer resolves to exactly one [`ErrorKind`] and carries
//! an [`ErrorContext`] describing the call that produced it.
//!
//! ## Error Kinds
//!
//! - [`ErrorKind::Network`] - transport faults (refused, reset, offline)
//! - [`ErrorKind::Server`] - 5xx responses and rate limiting
//! - [`ErrorKind::Validation`] - rejected request payloads
//! - [`ErrorKind::Authentication`] - 401/403 responses
//! - [`ErrorKind::Timeout`] - the attempt lost its timeout race
//! - [`ErrorKind::ServiceUnavailable`] - the circuit breaker refused the call
//!
//! ## Example
//!
//! ```
//! use daybook_error::{ClientError, ErrorContext, ErrorKind};
//!
//! let err = ClientError::new(
//!     ErrorKind::Validation,
//!     "title must not be empty",
//!     ErrorContext::new("/api/entries", "POST").with_status(400),
//! );
//! assert!(!err.is_retryable());
//! assert!(!err.counts_against_breaker());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Circuit breaker states, shared by the breaker itself and the error
/// context that reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally
    Closed = 0,
    /// Circuit is open - requests are rejected
    Open = 1,
    /// Circuit is half-open - a single probe is allowed through
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// The kind of failure a network call resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// Transport-level failure: refused, reset, unreachable or offline
    Network,
    /// The server answered with a failure status (5xx, 429)
    Server,
    /// The request was rejected as invalid (400 and other 4xx)
    Validation,
    /// The request lacked valid credentials (401, 403)
    Authentication,
    /// The attempt did not finish before its timeout
    Timeout,
    /// The circuit breaker refused the attempt locally
    ServiceUnavailable,
}

impl ErrorKind {
    /// Transient kinds are retried and feed the circuit breaker.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::Server | Self::Timeout)
    }

    /// Stable numeric code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Network => ErrorCode::Network,
            Self::Server => ErrorCode::Server,
            Self::Validation => ErrorCode::Validation,
            Self::Authentication => ErrorCode::Authentication,
            Self::Timeout => ErrorCode::Timeout,
            Self::ServiceUnavailable => ErrorCode::ServiceUnavailable,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "Network error",
            Self::Server => "Server error",
            Self::Validation => "Validation error",
            Self::Authentication => "Authentication error",
            Self::Timeout => "Timeout",
            Self::ServiceUnavailable => "Service unavailable",
        };
        f.write_str(name)
    }
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Network failure
    Network = 4001,
    /// Server failure
    Server = 4002,
    /// Validation failure
    Validation = 4003,
    /// Authentication failure
    Authentication = 4004,
    /// Timeout
    Timeout = 4005,
    /// Circuit open
    ServiceUnavailable = 4006,
}

/// Structured context attached to every surfaced error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorContext {
    /// Endpoint (URL or path) the call targeted
    pub endpoint: String,
    /// HTTP method, or the socket operation name
    pub method: String,
    /// When the error was produced
    pub timestamp: DateTime<Utc>,
    /// HTTP status, if a response was received
    pub status: Option<u16>,
    /// Attempt number (1-based) that produced the error
    pub attempt: Option<u32>,
    /// Retry limit configured for the call
    pub max_retries: Option<u32>,
    /// Breaker state at the time of the error
    pub circuit_state: Option<CircuitState>,
}

impl ErrorContext {
    /// Creates a context stamped with the current time
    pub fn new(endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        Self::at(endpoint, method, Utc::now())
    }

    /// Creates a context with an explicit timestamp
    pub fn at(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            timestamp,
            status: None,
            attempt: None,
            max_retries: None,
            circuit_state: None,
        }
    }

    /// Sets the HTTP status
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the attempt number and retry limit
    pub fn with_attempt(mut self, attempt: u32, max_retries: u32) -> Self {
        self.attempt = Some(attempt);
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the breaker state
    pub fn with_circuit_state(mut self, state: CircuitState) -> Self {
        self.circuit_state = Some(state);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.endpoint)?;
        if let Some(status) = self.status {
            write!(f, ", status {status}")?;
        }
        if let (Some(attempt), Some(max)) = (self.attempt, self.max_retries) {
            write!(f, ", attempt {attempt}/{}", max + 1)?;
        }
        if let Some(state) = self.circuit_state {
            write!(f, ", circuit {state}")?;
        }
        write!(f, ", at {}", self.timestamp.to_rfc3339())
    }
}

/// The error type surfaced by every Daybook client operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message} ({context})")]
pub struct ClientError {
    /// What kind of failure this is
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
    /// Call details
    pub context: ErrorContext,
    retryable: bool,
}

impl ClientError {
    /// Creates an error whose retryability follows its kind
    pub fn new(kind: ErrorKind, message: impl Into<String>, context: ErrorContext) -> Self {
        Self {
            kind,
            message: message.into(),
            context,
            retryable: kind.is_transient(),
        }
    }

    /// Overrides the retryable verdict
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Replaces the context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    /// Annotates the attempt counters
    pub fn with_attempt(mut self, attempt: u32, max_retries: u32) -> Self {
        self.context = self.context.with_attempt(attempt, max_retries);
        self
    }

    /// Annotates the breaker state
    pub fn with_circuit_state(mut self, state: CircuitState) -> Self {
        self.context = self.context.with_circuit_state(state);
        self
    }

    /// Returns true if another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Validation and authentication failures never count against the
    /// breaker, neither does a refusal produced by the breaker itself.
    pub fn counts_against_breaker(&self) -> bool {
        self.kind.is_transient()
    }

    /// Returns the error code for this error
    pub fn code(&self) -> ErrorCode {
        self.kind.code()
    }

    /// Shorthand for a network error
    pub fn network(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::new(ErrorKind::Network, message, context)
    }

    /// Shorthand for a server error
    pub fn server(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::new(ErrorKind::Server, message, context)
    }

    /// Shorthand for a validation error
    pub fn validation(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::new(ErrorKind::Validation, message, context)
    }

    /// Shorthand for an authentication error
    pub fn authentication(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::new(ErrorKind::Authentication, message, context)
    }

    /// Shorthand for a timeout error
    pub fn timeout(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::new(ErrorKind::Timeout, message, context)
    }

    /// Shorthand for a breaker refusal
    pub fn service_unavailable(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message, context)
    }
}

/// Convenient Result type using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;
