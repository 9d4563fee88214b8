//! Retry controller.
//!
//! Runs attempts until one is not a handled failure or the attempt budget is
//! spent, sleeping a backoff delay between attempts. Every await point is
//! raced against the caller's cancellation token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backoff::{next_delay, RandomSource, ThreadRandom};
use crate::cancellation::CancellationToken;
use crate::clock::{Clock, SystemClock};
use crate::config::RetryConfig;
use crate::errors::CancelledError;
use crate::events::{self, EventSink, NoOpEventSink};
use crate::outcome::{Classification, Classifier, Outcome};

/// Per-invocation retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    /// The current attempt, starting at 1.
    pub attempt: u32,
    /// When the invocation started.
    pub started_at: Instant,
    /// Total time slept between attempts so far.
    pub total_delay: Duration,
}

impl AttemptContext {
    /// Creates a context for an invocation starting at `started_at`.
    #[must_use]
    pub fn new(started_at: Instant) -> Self {
        Self {
            attempt: 1,
            started_at,
            total_delay: Duration::ZERO,
        }
    }

    /// Time between the start of the invocation and `now`.
    #[must_use]
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

/// The result of a retry sequence.
#[derive(Debug)]
pub struct RetryReport<T, E> {
    /// The last attempt's outcome.
    pub outcome: Outcome<T, E>,
    /// How the retry rules classified that outcome.
    pub classification: Classification,
    /// True when the last attempt was a handled failure and no attempts remain.
    pub exhausted: bool,
    /// The final attempt context.
    pub context: AttemptContext,
}

impl<T, E> RetryReport<T, E> {
    /// Number of attempts made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.context.attempt
    }
}

/// Drives attempts according to a [`RetryConfig`].
pub struct RetryController<T, E> {
    config: RetryConfig,
    classifier: Arc<dyn Classifier<T, E>>,
    random: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl<T, E> RetryController<T, E> {
    /// Creates a controller classifying outcomes with `classifier`.
    pub fn new(config: RetryConfig, classifier: Arc<dyn Classifier<T, E>>) -> Self {
        Self {
            config,
            classifier,
            random: Arc::new(ThreadRandom),
            clock: Arc::new(SystemClock),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the clock used to time the invocation.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the jitter random source.
    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Sets the sink receiving retry events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs attempts until one is not handled or the budget is spent.
    ///
    /// `run_attempt` receives the 1-based attempt number and performs one
    /// timeout-guarded attempt. Cancellation during an attempt or a backoff
    /// sleep ends the sequence with `CancelledError`.
    pub async fn execute<F, Fut>(
        &self,
        mut run_attempt: F,
        cancel: &CancellationToken,
    ) -> Result<RetryReport<T, E>, CancelledError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Outcome<T, E>, CancelledError>>,
    {
        let mut context = AttemptContext::new(self.clock.now());

        loop {
            debug!(attempt = context.attempt, "Starting attempt");
            let outcome = run_attempt(context.attempt).await?;
            let classification = self.classifier.classify(&outcome);

            if !classification.is_handled() {
                debug!(attempt = context.attempt, outcome = outcome.kind(), "Attempt settled");
                return Ok(RetryReport {
                    outcome,
                    classification,
                    exhausted: false,
                    context,
                });
            }

            if context.attempt >= self.config.max_attempts {
                let elapsed_ms = context.elapsed(self.clock.now()).as_millis() as u64;
                warn!(
                    attempts = context.attempt,
                    total_delay_ms = context.total_delay.as_millis() as u64,
                    elapsed_ms,
                    outcome = outcome.kind(),
                    "Retries exhausted"
                );
                self.events
                    .emit(
                        events::RETRY_EXHAUSTED,
                        Some(events::stamped(serde_json::json!({
                            "attempts": context.attempt,
                            "total_delay_ms": context.total_delay.as_millis() as u64,
                            "elapsed_ms": elapsed_ms,
                            "outcome": outcome.kind(),
                        }))),
                    )
                    .await;
                return Ok(RetryReport {
                    outcome,
                    classification,
                    exhausted: true,
                    context,
                });
            }

            let delay = next_delay(context.attempt, &self.config, self.random.as_ref());
            debug!(
                attempt = context.attempt,
                outcome = outcome.kind(),
                delay_ms = delay.as_millis() as u64,
                "Handled failure; retrying after backoff"
            );
            self.events
                .emit(
                    events::RETRY_SCHEDULED,
                    Some(events::stamped(serde_json::json!({
                        "attempt": context.attempt,
                        "delay_ms": delay.as_millis() as u64,
                        "outcome": outcome.kind(),
                    }))),
                )
                .await;

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    return Err(CancelledError::new(
                        cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                    ));
                }
                () = tokio::time::sleep(delay) => {}
            }

            context.total_delay += delay;
            context.attempt += 1;
        }
    }
}

impl<T, E> std::fmt::Debug for RetryController<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("config", &self.config)
            .field("random", &self.random)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
