//! Failure classification
//!
//! Maps a raw failure (response status, transport fault, lost timeout race)
//! to exactly one [`ErrorKind`] plus a retryable verdict.

use daybook_error::{ClientError, ErrorContext, ErrorKind};
use std::time::Duration;

/// A raw failure observed while performing a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The server answered with a non-success status
    Status {
        /// HTTP status code
        status: u16,
        /// Body text or reason phrase
        message: String,
    },
    /// The connection was refused or could not be established
    ConnectionRefused(String),
    /// The request went out but no response came back
    NoResponse(String),
    /// The attempt lost its timeout race and was aborted
    TimedOut(Duration),
    /// Anything else; classified by inspecting the message
    Other(String),
}

/// Outcome of classifying a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Resolved kind
    pub kind: ErrorKind,
    /// Whether another attempt may succeed
    pub retryable: bool,
}

impl Classification {
    fn retryable(kind: ErrorKind) -> Self {
        Self { kind, retryable: true }
    }

    fn fatal(kind: ErrorKind) -> Self {
        Self { kind, retryable: false }
    }
}

/// Total classifier for call failures
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an HTTP status. Returns `None` for success statuses.
    pub fn classify_status(status: u16) -> Option<Classification> {
        match status {
            100..=399 => None,
            400 => Some(Classification::fatal(ErrorKind::Validation)),
            401 | 403 => Some(Classification::fatal(ErrorKind::Authentication)),
            408 => Some(Classification::retryable(ErrorKind::Timeout)),
            429 => Some(Classification::retryable(ErrorKind::Server)),
            402..=499 => Some(Classification::fatal(ErrorKind::Validation)),
            _ => Some(Classification::retryable(ErrorKind::Server)),
        }
    }

    /// Classify any failure
    pub fn classify(failure: &Failure) -> Classification {
        match failure {
            Failure::Status { status, .. } => Self::classify_status(*status)
                .unwrap_or(Classification::fatal(ErrorKind::Server)),
            Failure::ConnectionRefused(_) | Failure::NoResponse(_) => {
                Classification::retryable(ErrorKind::Network)
            }
            Failure::TimedOut(_) => Classification::retryable(ErrorKind::Timeout),
            Failure::Other(message) => {
                if Self::looks_like_timeout(message) {
                    Classification::retryable(ErrorKind::Timeout)
                } else if Self::looks_like_transport_fault(message) {
                    Classification::retryable(ErrorKind::Network)
                } else {
                    Classification::fatal(ErrorKind::Network)
                }
            }
        }
    }

    /// Classify and build the surfaced error
    pub fn to_error(failure: &Failure, mut context: ErrorContext) -> ClientError {
        let verdict = Self::classify(failure);
        let message = match failure {
            Failure::Status { status, message } => {
                context = context.with_status(*status);
                if message.is_empty() {
                    format!("request failed with status {status}")
                } else {
                    message.clone()
                }
            }
            Failure::ConnectionRefused(message) => format!("connection refused: {message}"),
            Failure::NoResponse(message) => format!("no response from server: {message}"),
            Failure::TimedOut(after) => format!("request timed out after {after:?}"),
            Failure::Other(message) => message.clone(),
        };
        ClientError::new(verdict.kind, message, context).with_retryable(verdict.retryable)
    }

    /// Heuristic for opaque errors that are really transport faults
    pub fn looks_like_transport_fault(message: &str) -> bool {
        let msg = message.to_lowercase();
        msg.contains("connection")
            || msg.contains("network")
            || msg.contains("dns")
            || msg.contains("resolve")
            || msg.contains("unreachable")
            || msg.contains("reset by peer")
            || msg.contains("broken pipe")
            || msg.contains("failed to fetch")
    }

    fn looks_like_timeout(message: &str) -> bool {
        let msg = message.to_lowercase();
        msg.contains("timed out") || msg.contains("timeout")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> Failure {
        Failure::Status {
            status: code,
            message: String::new(),
        }
    }

    #[test]
    fn test_success_statuses_are_not_failures() {
        assert_eq!(ErrorClassifier::classify_status(200), None);
        assert_eq!(ErrorClassifier::classify_status(204), None);
        assert_eq!(ErrorClassifier::classify_status(304), None);
    }

    #[test]
    fn test_validation_status() {
        let c = ErrorClassifier::classify(&status(400));
        assert_eq!(c.kind, ErrorKind::Validation);
        assert!(!c.retryable);

        let c = ErrorClassifier::classify(&status(404));
        assert_eq!(c.kind, ErrorKind::Validation);
        assert!(!c.retryable);
    }

    #[test]
    fn test_authentication_statuses() {
        for code in [401, 403] {
            let c = ErrorClassifier::classify(&status(code));
            assert_eq!(c.kind, ErrorKind::Authentication);
            assert!(!c.retryable);
        }
    }

    #[test]
    fn test_server_statuses_retryable() {
        for code in [500, 502, 503, 504, 429] {
            let c = ErrorClassifier::classify(&status(code));
            assert_eq!(c.kind, ErrorKind::Server);
            assert!(c.retryable);
        }
        assert_eq!(
            ErrorClassifier::classify(&status(408)).kind,
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_transport_faults() {
        let refused = ErrorClassifier::classify(&Failure::ConnectionRefused("eof".into()));
        assert_eq!(refused, Classification::retryable(ErrorKind::Network));

        let silent = ErrorClassifier::classify(&Failure::NoResponse("closed".into()));
        assert_eq!(silent, Classification::retryable(ErrorKind::Network));

        let slow = ErrorClassifier::classify(&Failure::TimedOut(Duration::from_secs(3)));
        assert_eq!(slow, Classification::retryable(ErrorKind::Timeout));
    }

    #[test]
    fn test_opaque_errors() {
        let dns = ErrorClassifier::classify(&Failure::Other("dns error: failed to resolve".into()));
        assert_eq!(dns, Classification::retryable(ErrorKind::Network));

        let bad = ErrorClassifier::classify(&Failure::Other("builder error: relative URL".into()));
        assert_eq!(bad, Classification::fatal(ErrorKind::Network));
    }

    #[test]
    fn test_to_error_carries_status_and_message() {
        let failure = Failure::Status {
            status: 503,
            message: "maintenance".into(),
        };
        let err = ErrorClassifier::to_error(&failure, ErrorContext::new("/api/entries", "GET"));

        assert_eq!(err.kind, ErrorKind::Server);
        assert_eq!(err.message, "maintenance");
        assert_eq!(err.context.status, Some(503));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_to_error_fatal_network() {
        let err = ErrorClassifier::to_error(
            &Failure::Other("invalid header value".into()),
            ErrorContext::new("/api/entries", "POST"),
        );
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(!err.is_retryable());
    }
}
