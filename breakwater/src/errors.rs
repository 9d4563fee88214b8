//! Error types for breakwater pipelines.
//!
//! Every failure an invocation can produce is a typed value returned to the
//! caller. The taxonomy keeps "the dependency is down" (`CircuitOpen`)
//! distinguishable from "this call failed after retries" (`RetriesExhausted`).

use std::time::Duration;
use thiserror::Error;

use crate::circuit_breaker::CircuitState;
use crate::outcome::Outcome;

/// Result alias for pipeline invocations.
pub type PipelineResult<T, E> = Result<T, PipelineError<T, E>>;

/// The error returned by [`Pipeline::invoke`](crate::pipeline::Pipeline::invoke).
#[derive(Debug, Error)]
pub enum PipelineError<T, E> {
    /// The operation's own error, classified as not handled.
    #[error("operation failed: {0}")]
    Operation(E),

    /// An attempt exceeded its budget and the retry rules do not handle timeouts.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// Every attempt ended in a handled failure.
    #[error("{0}")]
    RetriesExhausted(RetriesExhaustedError<T, E>),

    /// The circuit breaker rejected the call without running it.
    #[error("{0}")]
    CircuitOpen(#[from] CircuitOpenError),

    /// The caller cancelled the invocation.
    #[error("{0}")]
    Cancelled(#[from] CancelledError),
}

impl<T, E> PipelineError<T, E> {
    /// Returns true if the call was rejected by an open breaker.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Returns true if the caller cancelled the invocation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if retries were exhausted.
    #[must_use]
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted(_))
    }

    /// Whether an upstream caller may reasonably retry this invocation.
    ///
    /// An open circuit means the dependency is known to be down, and a
    /// cancelled call was abandoned on purpose; both answer `false`.
    #[must_use]
    pub fn is_retryable_upstream(&self) -> bool {
        !matches!(self, Self::CircuitOpen(_) | Self::Cancelled(_))
    }

    /// Number of attempts made before this error surfaced, when known.
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted(e) => Some(e.attempts),
            Self::CircuitOpen(_) | Self::Cancelled(_) => Some(0),
            Self::Operation(_) | Self::Timeout(_) => None,
        }
    }

    /// Extracts the operation's own error, if this failure carries one.
    #[must_use]
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::RetriesExhausted(RetriesExhaustedError {
                last: Outcome::Failure(e),
                ..
            }) => Some(e),
            _ => None,
        }
    }
}

/// An attempt exceeded the per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("attempt timed out after {timeout:?}")]
pub struct TimeoutError {
    /// The budget that was exceeded.
    pub timeout: Duration,
}

impl TimeoutError {
    /// Creates a new timeout error.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// The final outcome after every allowed attempt was a handled failure.
#[derive(Debug, Error)]
#[error("retries exhausted after {attempts} attempts: {last}")]
pub struct RetriesExhaustedError<T, E> {
    /// Number of attempts made.
    pub attempts: u32,
    /// Total time spent sleeping between attempts.
    pub total_delay: Duration,
    /// The last attempt's outcome, never masked as success.
    pub last: Outcome<T, E>,
}

/// A call was rejected by the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit breaker rejected the call (state: {state})")]
pub struct CircuitOpenError {
    /// The breaker state at rejection time.
    pub state: CircuitState,
    /// Remaining break time, when the breaker will reopen for a probe on its own.
    pub retry_after: Option<Duration>,
}

impl CircuitOpenError {
    /// Creates a new rejection.
    #[must_use]
    pub fn new(state: CircuitState, retry_after: Option<Duration>) -> Self {
        Self { state, retry_after }
    }

    /// Returns true if the breaker was manually isolated.
    #[must_use]
    pub fn is_isolated(&self) -> bool {
        self.state == CircuitState::Isolated
    }
}

/// The caller cancelled the invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invocation cancelled: {reason}")]
pub struct CancelledError {
    /// The first cancellation reason recorded on the token.
    pub reason: String,
}

impl CancelledError {
    /// Creates a new cancellation error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Invalid or unreadable pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("invalid value for `{field}`: {message}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// A pipeline was built without a classifier for one of its policies.
    #[error("no classifier configured for the {policy} policy")]
    MissingClassifier {
        /// The policy lacking a classifier.
        policy: &'static str,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a validation error.
    #[must_use]
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Error = PipelineError<u16, String>;

    #[test]
    fn test_circuit_open_is_not_retryable_upstream() {
        let err: Error = CircuitOpenError::new(CircuitState::Open, Some(Duration::from_secs(3))).into();
        assert!(err.is_circuit_open());
        assert!(!err.is_retryable_upstream());
        assert_eq!(err.attempts(), Some(0));
    }

    #[test]
    fn test_retries_exhausted_is_retryable_upstream() {
        let err: Error = PipelineError::RetriesExhausted(RetriesExhaustedError {
            attempts: 3,
            total_delay: Duration::from_secs(2),
            last: Outcome::Failure("boom".to_string()),
        });
        assert!(err.is_retries_exhausted());
        assert!(err.is_retryable_upstream());
        assert_eq!(err.attempts(), Some(3));
        assert_eq!(err.into_operation_error(), Some("boom".to_string()));
    }

    #[test]
    fn test_cancelled_display() {
        let err: Error = CancelledError::new("shutdown").into();
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "invocation cancelled: shutdown");
    }

    #[test]
    fn test_exhausted_display_names_handled_status() {
        let err: Error = PipelineError::RetriesExhausted(RetriesExhaustedError {
            attempts: 4,
            total_delay: Duration::from_secs(3),
            last: Outcome::Success(408),
        });
        assert_eq!(
            err.to_string(),
            "retries exhausted after 4 attempts: handled result (status 408)"
        );
    }

    #[test]
    fn test_exhausted_display_includes_last_outcome() {
        let err: Error = PipelineError::RetriesExhausted(RetriesExhaustedError {
            attempts: 2,
            total_delay: Duration::ZERO,
            last: Outcome::Timeout(Duration::from_secs(5)),
        });
        assert_eq!(
            err.to_string(),
            "retries exhausted after 2 attempts: timed out after 5s"
        );
    }

    #[test]
    fn test_isolated_rejection() {
        let err = CircuitOpenError::new(CircuitState::Isolated, None);
        assert!(err.is_isolated());
        assert_eq!(
            err.to_string(),
            "circuit breaker rejected the call (state: isolated)"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("retry.max_attempts", "must be >= 1");
        assert_eq!(
            err.to_string(),
            "invalid value for `retry.max_attempts`: must be >= 1"
        );
    }
}
