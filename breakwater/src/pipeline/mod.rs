//! The resilience pipeline.
//!
//! Policies nest as circuit breaker → retry → timeout → operation. The
//! breaker admits the invocation once, the retry controller runs
//! timeout-guarded attempts, and the breaker then records the aggregate
//! outcome of the whole retry sequence as a single sample.
//!
//! ```rust,ignore
//! let pipeline = Pipeline::<u16, String>::new(PipelineConfig::default())?;
//! let status = pipeline
//!     .invoke(from_fn(|_cancel| async { client.get("todos/1").await }), &token)
//!     .await?;
//! ```

mod builder;

pub use builder::PipelineBuilder;

use std::sync::Arc;
use tracing::{debug, field, info_span, Instrument, Span};
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::PipelineConfig;
use crate::errors::{
    CancelledError, ConfigError, PipelineError, PipelineResult, RetriesExhaustedError, TimeoutError,
};
use crate::events::{self, EventSink};
use crate::observability::{InvocationSpanAttributes, SpanTimer};
use crate::operation::Operation;
use crate::outcome::{Classifier, Outcome, Signal};
use crate::retry::{RetryController, RetryReport};
use crate::timeout::TimeoutGuard;

/// A composed breaker, retry and timeout pipeline.
///
/// One pipeline owns one breaker. Share it across tasks with `Arc`; every
/// invocation gets its own attempt context.
pub struct Pipeline<T, E> {
    name: String,
    breaker: CircuitBreaker,
    retry: RetryController<T, E>,
    timeout: TimeoutGuard,
    breaker_classifier: Arc<dyn Classifier<T, E>>,
    events: Arc<dyn EventSink>,
}

impl<T: Signal, E: Signal> Pipeline<T, E> {
    /// Builds a pipeline classifying outcomes with the configured rule sets.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        PipelineBuilder::new(config).with_configured_rules().build()
    }
}

impl<T, E> Pipeline<T, E> {
    /// Starts a builder for custom classifiers, clock, randomness or events.
    #[must_use]
    pub fn builder(config: PipelineConfig) -> PipelineBuilder<T, E> {
        PipelineBuilder::new(config)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the pipeline's circuit breaker.
    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Returns the per-attempt timeout guard.
    #[must_use]
    pub fn timeout(&self) -> &TimeoutGuard {
        &self.timeout
    }

    /// Runs `operation` through the pipeline.
    ///
    /// Returns the operation's value, or a [`PipelineError`] saying why
    /// there is none. Cancelling `cancel` aborts the invocation at its next
    /// suspension point without feeding the breaker.
    pub async fn invoke<Op>(&self, operation: Op, cancel: &CancellationToken) -> PipelineResult<T, E>
    where
        Op: Operation<T, E>,
    {
        let invocation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "pipeline.invoke",
            pipeline = %self.name,
            invocation_id = %invocation_id,
            attempts = field::Empty,
            outcome = field::Empty,
        );
        self.execute(&operation, cancel, &invocation_id)
            .instrument(span)
            .await
    }

    /// Runs `operation` with a token nobody else can cancel.
    pub async fn invoke_uncancellable<Op>(&self, operation: Op) -> PipelineResult<T, E>
    where
        Op: Operation<T, E>,
    {
        self.invoke(operation, &CancellationToken::new()).await
    }

    async fn execute<Op>(
        &self,
        operation: &Op,
        cancel: &CancellationToken,
        invocation_id: &str,
    ) -> PipelineResult<T, E>
    where
        Op: Operation<T, E>,
    {
        let timer = SpanTimer::start("pipeline.invoke");

        if cancel.is_cancelled() {
            let error = CancelledError::new(cancel.reason().unwrap_or_else(|| "cancelled".to_string()));
            return Err(self.cancelled(error, invocation_id).await);
        }

        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => {
                debug!(
                    state = %rejection.state,
                    retry_after_ms = rejection.retry_after.map(|d| d.as_millis() as u64),
                    "Call rejected by circuit breaker"
                );
                self.events
                    .emit(
                        events::PIPELINE_REJECTED,
                        Some(events::stamped(serde_json::json!({
                            "pipeline": self.name,
                            "invocation_id": invocation_id,
                            "state": rejection.state,
                            "retry_after_ms": rejection.retry_after.map(|d| d.as_millis() as u64),
                        }))),
                    )
                    .await;
                Span::current().record("outcome", "circuit_open");
                return Err(rejection.into());
            }
        };

        let timeout = &self.timeout;
        let sink = &self.events;
        let report = self
            .retry
            .execute(
                |attempt| async move {
                    let outcome = timeout.run(operation, cancel).await;
                    let timed_out = match &outcome {
                        Ok(Outcome::Timeout(after)) => Some(*after),
                        _ => None,
                    };
                    if let Some(after) = timed_out {
                        sink.emit(
                            events::ATTEMPT_TIMED_OUT,
                            Some(events::stamped(serde_json::json!({
                                "attempt": attempt,
                                "timeout_ms": after.as_millis() as u64,
                            }))),
                        )
                        .await;
                    }
                    outcome
                },
                cancel,
            )
            .await;

        let report = match report {
            Ok(report) => report,
            Err(error) => {
                drop(permit);
                return Err(self.cancelled(error, invocation_id).await);
            }
        };

        permit.record(self.breaker_classifier.classify(&report.outcome));

        let attempts = report.attempts();
        let result = Self::resolve(report);
        let kind = result_kind(&result);
        let span = Span::current();
        span.record("attempts", attempts);
        span.record("outcome", kind);
        debug!(attempts, outcome = kind, "Invocation finished");

        let attributes = InvocationSpanAttributes::new(self.name.clone())
            .with_invocation_id(invocation_id)
            .with_attempts(attempts)
            .with_outcome(kind)
            .with_duration_ms(timer.finish())
            .with_breaker_state(self.breaker.state());
        self.events
            .emit(
                events::PIPELINE_COMPLETED,
                serde_json::to_value(&attributes).ok().map(events::stamped),
            )
            .await;

        result
    }

    fn resolve(report: RetryReport<T, E>) -> PipelineResult<T, E> {
        if report.exhausted {
            return Err(PipelineError::RetriesExhausted(RetriesExhaustedError {
                attempts: report.context.attempt,
                total_delay: report.context.total_delay,
                last: report.outcome,
            }));
        }
        match report.outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(error) => Err(PipelineError::Operation(error)),
            Outcome::Timeout(after) => Err(TimeoutError::new(after).into()),
        }
    }

    async fn cancelled(&self, error: CancelledError, invocation_id: &str) -> PipelineError<T, E> {
        debug!(reason = %error.reason, "Invocation cancelled");
        Span::current().record("outcome", "cancelled");
        self.events
            .emit(
                events::PIPELINE_CANCELLED,
                Some(events::stamped(serde_json::json!({
                    "pipeline": self.name,
                    "invocation_id": invocation_id,
                    "reason": error.reason,
                }))),
            )
            .await;
        error.into()
    }
}

fn result_kind<T, E>(result: &PipelineResult<T, E>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(PipelineError::Operation(_)) => "operation",
        Err(PipelineError::Timeout(_)) => "timeout",
        Err(PipelineError::RetriesExhausted(_)) => "retries_exhausted",
        Err(PipelineError::CircuitOpen(_)) => "circuit_open",
        Err(PipelineError::Cancelled(_)) => "cancelled",
    }
}

impl<T, E> std::fmt::Debug for Pipeline<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffType;
    use crate::circuit_breaker::CircuitState;
    use crate::config::{CircuitBreakerConfig, RetryConfig, TimeoutConfig};
    use crate::events::CollectingEventSink;
    use crate::operation::from_fn;
    use crate::outcome::ShouldHandle;
    use std::time::Duration;

    fn config() -> PipelineConfig {
        PipelineConfig::new()
            .with_retry(
                RetryConfig::new()
                    .with_max_attempts(3)
                    .with_backoff(BackoffType::Constant)
                    .with_base_delay_ms(1000)
                    .with_jitter(false),
            )
            .with_circuit_breaker(CircuitBreakerConfig::new().with_minimum_throughput(3))
            .with_timeout(TimeoutConfig::new(5000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_passes_through() {
        let pipeline = Pipeline::<u16, String>::new(config()).unwrap();
        let result = pipeline
            .invoke_uncancellable(from_fn(|_| async { Ok::<u16, String>(200) }))
            .await;
        assert_eq!(result.unwrap(), 200);
        assert_eq!(pipeline.circuit_breaker().snapshot().throughput, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhandled_error_is_operation_error() {
        let config = config().with_retry(
            RetryConfig::new().with_should_handle(ShouldHandle::status_codes([408])),
        );
        let pipeline = Pipeline::<u16, String>::new(config).unwrap();

        let err = pipeline
            .invoke_uncancellable(from_fn(|_| async { Err::<u16, String>("bad request".into()) }))
            .await
            .unwrap_err();
        assert_eq!(err.into_operation_error(), Some("bad request".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_one_breaker_sample() {
        let pipeline = Pipeline::<u16, String>::new(config()).unwrap();

        let err = pipeline
            .invoke_uncancellable(from_fn(|_| async { Err::<u16, String>("down".into()) }))
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), Some(3));
        let snapshot = pipeline.circuit_breaker().snapshot();
        assert_eq!(snapshot.throughput, 1);
        assert_eq!(snapshot.handled_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_emits_event() {
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = Pipeline::<u16, String>::builder(config())
            .with_event_sink(sink.clone())
            .with_configured_rules()
            .build()
            .unwrap();
        pipeline.circuit_breaker().isolate();

        let err = pipeline
            .invoke_uncancellable(from_fn(|_| async { Ok::<u16, String>(200) }))
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert!(!err.is_retryable_upstream());
        assert_eq!(sink.count(events::PIPELINE_REJECTED), 1);
        assert_eq!(pipeline.circuit_breaker().state(), CircuitState::Isolated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_event_carries_attributes() {
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = Pipeline::<u16, String>::builder(config())
            .with_name("orders")
            .with_event_sink(sink.clone())
            .with_configured_rules()
            .build()
            .unwrap();

        pipeline
            .invoke_uncancellable(from_fn(|_| async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok::<u16, String>(200)
            }))
            .await
            .unwrap();

        let completed = sink.last(events::PIPELINE_COMPLETED).unwrap();
        let data = completed.data.unwrap();
        assert_eq!(data["pipeline"], "orders");
        assert_eq!(data["attempts"], 1);
        assert_eq!(data["outcome"], "success");
        assert_eq!(data["breaker_state"], "closed");
        assert!(data["duration_ms"].as_f64().unwrap() >= 40.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_cancelled_token_skips_everything() {
        let pipeline = Pipeline::<u16, String>::new(config()).unwrap();
        let token = CancellationToken::new();
        token.cancel("caller gave up");

        let err = pipeline
            .invoke(from_fn(|_| async { Ok::<u16, String>(200) }), &token)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "invocation cancelled: caller gave up");
        assert_eq!(pipeline.circuit_breaker().snapshot().throughput, 0);
    }
}
