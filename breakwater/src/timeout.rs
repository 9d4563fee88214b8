//! Per-attempt timeout enforcement.
//!
//! The guard races one attempt against a deadline and the caller's
//! cancellation. Whichever side loses is dropped, so a timed-out operation
//! future is released immediately, and its attempt token is cancelled so
//! work it spawned elsewhere can stop too.

use std::time::Duration;
use tracing::debug;

use crate::cancellation::CancellationToken;
use crate::config::TimeoutConfig;
use crate::errors::CancelledError;
use crate::operation::Operation;
use crate::outcome::Outcome;

/// Bounds a single attempt to a maximum duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutGuard {
    per_attempt: Duration,
}

impl TimeoutGuard {
    /// Creates a guard with the given budget.
    #[must_use]
    pub fn new(per_attempt: Duration) -> Self {
        Self { per_attempt }
    }

    /// Creates a guard from configuration.
    #[must_use]
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self::new(config.per_attempt())
    }

    /// The per-attempt budget.
    #[must_use]
    pub fn per_attempt(&self) -> Duration {
        self.per_attempt
    }

    /// Runs one attempt of `operation`.
    ///
    /// Returns the attempt's outcome, `Outcome::Timeout` if the deadline
    /// elapsed first, or `CancelledError` if `cancel` fired first.
    pub async fn run<T, E, Op>(
        &self,
        operation: &Op,
        cancel: &CancellationToken,
    ) -> Result<Outcome<T, E>, CancelledError>
    where
        Op: Operation<T, E> + ?Sized,
    {
        let attempt_token = cancel.child_token();
        let attempt = operation.call(attempt_token.clone());

        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                Err(CancelledError::new(
                    cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                ))
            }
            result = attempt => Ok(Outcome::from(result)),
            () = tokio::time::sleep(self.per_attempt) => {
                attempt_token.cancel(format!("attempt exceeded {:?}", self.per_attempt));
                debug!(timeout_ms = self.per_attempt.as_millis() as u64, "Attempt timed out");
                Ok(Outcome::Timeout(self.per_attempt))
            }
        }
    }
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::from_fn;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_passes_through() {
        let guard = TimeoutGuard::new(Duration::from_secs(5));
        let op = from_fn(|_| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<u16, String>(200)
        });

        let outcome = guard.run(&op, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Success(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_passes_through() {
        let guard = TimeoutGuard::new(Duration::from_secs(5));
        let op = from_fn(|_| async { Err::<u16, String>("refused".into()) });

        let outcome = guard.run(&op, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Failure("refused".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_times_out() {
        let guard = TimeoutGuard::new(Duration::from_secs(5));
        let op = from_fn(|_| async {
            tokio::time::sleep(Duration::from_secs(6)).await;
            Ok::<u16, String>(200)
        });

        let outcome = guard.run(&op, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Timeout(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_attempt_token_but_not_caller() {
        let guard = TimeoutGuard::new(Duration::from_millis(100));
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let flag = saw_cancel.clone();
        let op = from_fn(move |token: CancellationToken| {
            let flag = flag.clone();
            async move {
                token.on_cancel(move || flag.store(true, Ordering::SeqCst));
                std::future::pending::<Result<(), String>>().await
            }
        });

        let caller = CancellationToken::new();
        let outcome = guard.run(&op, &caller).await.unwrap();

        assert!(outcome.is_timeout());
        assert!(saw_cancel.load(Ordering::SeqCst));
        assert!(!caller.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_wins() {
        let guard = TimeoutGuard::new(Duration::from_secs(60));
        let op = from_fn(|_| std::future::pending::<Result<(), String>>());

        let caller = CancellationToken::new();
        let trigger = caller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel("user aborted");
        });

        let err = guard.run(&op, &caller).await.unwrap_err();
        assert_eq!(err, CancelledError::new("user aborted"));
    }
}
