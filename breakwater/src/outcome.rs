//! Attempt outcomes and their classification.
//!
//! Each attempt produces an [`Outcome`]. Retry and circuit breaker each
//! consult their own [`Classifier`] to decide whether that outcome is a
//! handled failure. Classifiers are either tagged rule sets ([`ShouldHandle`],
//! serializable and replayable) or explicit implementations of the trait.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// The operation returned a value.
    Success(T),
    /// The operation returned an error.
    Failure(E),
    /// The attempt exceeded its per-attempt budget.
    Timeout(Duration),
}

impl<T, E> Outcome<T, E> {
    /// Returns true for `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true for `Failure`.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true for `Timeout`.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Short label used in logs and events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(_) => "failure",
            Self::Timeout(_) => "timeout",
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }
}

impl<T: Signal, E: fmt::Display> fmt::Display for Outcome<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(value) => match (value.status_code(), value.error_kind()) {
                (Some(code), _) => write!(f, "handled result (status {code})"),
                (None, Some(kind)) => write!(f, "handled result ({kind})"),
                (None, None) => write!(f, "handled result"),
            },
            Self::Failure(e) => write!(f, "{e}"),
            Self::Timeout(d) => write!(f, "timed out after {d:?}"),
        }
    }
}

/// Whether an outcome counts toward retry or breaker accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// A failure the policy acts on.
    Handled,
    /// An outcome propagated untouched.
    Unhandled,
}

impl Classification {
    /// Returns true for `Handled`.
    #[must_use]
    pub fn is_handled(self) -> bool {
        self == Self::Handled
    }
}

impl From<bool> for Classification {
    fn from(handled: bool) -> Self {
        if handled {
            Self::Handled
        } else {
            Self::Unhandled
        }
    }
}

/// Observable properties of results and errors that tagged rules can match on.
///
/// Both methods default to `None`, so implementing the trait for a type that
/// exposes neither is a one-liner.
pub trait Signal {
    /// A protocol status code, such as an HTTP status.
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// A symbolic error kind.
    fn error_kind(&self) -> Option<&str> {
        None
    }
}

impl Signal for () {}

impl Signal for u16 {
    fn status_code(&self) -> Option<u16> {
        Some(*self)
    }
}

impl Signal for String {
    fn error_kind(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl Signal for &str {
    fn error_kind(&self) -> Option<&str> {
        Some(*self)
    }
}

impl Signal for std::io::Error {
    fn error_kind(&self) -> Option<&str> {
        Some(match self.kind() {
            std::io::ErrorKind::ConnectionRefused => "connection_refused",
            std::io::ErrorKind::ConnectionReset => "connection_reset",
            std::io::ErrorKind::ConnectionAborted => "connection_aborted",
            std::io::ErrorKind::TimedOut => "timed_out",
            std::io::ErrorKind::Interrupted => "interrupted",
            std::io::ErrorKind::WouldBlock => "would_block",
            std::io::ErrorKind::BrokenPipe => "broken_pipe",
            std::io::ErrorKind::NotFound => "not_found",
            std::io::ErrorKind::PermissionDenied => "permission_denied",
            _ => "other",
        })
    }
}

/// Decides whether an outcome is a handled failure. Must be side-effect free.
pub trait Classifier<T, E>: Send + Sync {
    /// Classifies one outcome.
    fn classify(&self, outcome: &Outcome<T, E>) -> Classification;
}

/// Classifies `outcome` with `classifier`.
pub fn classify<T, E>(outcome: &Outcome<T, E>, classifier: &dyn Classifier<T, E>) -> Classification {
    classifier.classify(outcome)
}

/// A single tagged rule. A rule set handles an outcome when any rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum HandleRule {
    /// Any operation error.
    Failure,
    /// Any per-attempt timeout.
    Timeout,
    /// A result or error whose status code is listed.
    StatusCode {
        /// Codes that count as handled.
        codes: Vec<u16>,
    },
    /// An error whose kind is listed.
    ErrorKind {
        /// Kinds that count as handled.
        kinds: Vec<String>,
    },
}

impl HandleRule {
    /// Returns true if this rule matches the outcome.
    #[must_use]
    pub fn matches<T: Signal, E: Signal>(&self, outcome: &Outcome<T, E>) -> bool {
        match (self, outcome) {
            (Self::Failure, Outcome::Failure(_)) | (Self::Timeout, Outcome::Timeout(_)) => true,
            (Self::StatusCode { codes }, Outcome::Success(value)) => {
                value.status_code().is_some_and(|code| codes.contains(&code))
            }
            (Self::StatusCode { codes }, Outcome::Failure(error)) => {
                error.status_code().is_some_and(|code| codes.contains(&code))
            }
            (Self::ErrorKind { kinds }, Outcome::Failure(error)) => error
                .error_kind()
                .is_some_and(|kind| kinds.iter().any(|k| k == kind)),
            _ => false,
        }
    }
}

/// A serializable rule set used as a classifier.
///
/// The default handles every operation error and every timeout, so timeouts
/// count toward both retry and breaker unless the rule set says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShouldHandle {
    rules: Vec<HandleRule>,
}

impl Default for ShouldHandle {
    fn default() -> Self {
        Self {
            rules: vec![HandleRule::Failure, HandleRule::Timeout],
        }
    }
}

impl ShouldHandle {
    /// A rule set that handles nothing.
    #[must_use]
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    /// A rule set handling the given status codes only.
    #[must_use]
    pub fn status_codes(codes: impl IntoIterator<Item = u16>) -> Self {
        Self::none().with_rule(HandleRule::StatusCode {
            codes: codes.into_iter().collect(),
        })
    }

    /// Adds a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: HandleRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Returns the rules.
    #[must_use]
    pub fn rules(&self) -> &[HandleRule] {
        &self.rules
    }

    /// Returns true if timeouts are handled by this rule set.
    #[must_use]
    pub fn handles_timeouts(&self) -> bool {
        self.rules.contains(&HandleRule::Timeout)
    }
}

impl<T: Signal, E: Signal> Classifier<T, E> for ShouldHandle {
    fn classify(&self, outcome: &Outcome<T, E>) -> Classification {
        self.rules.iter().any(|rule| rule.matches(outcome)).into()
    }
}

/// Adapts a predicate closure into a [`Classifier`].
pub struct FnClassifier<F>(pub F);

impl<F> fmt::Debug for FnClassifier<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FnClassifier").finish_non_exhaustive()
    }
}

impl<T, E, F> Classifier<T, E> for FnClassifier<F>
where
    F: Fn(&Outcome<T, E>) -> bool + Send + Sync,
{
    fn classify(&self, outcome: &Outcome<T, E>) -> Classification {
        (self.0)(outcome).into()
    }
}
