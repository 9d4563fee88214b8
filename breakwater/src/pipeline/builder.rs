//! Pipeline builder with validation.

use std::sync::Arc;

use super::Pipeline;
use crate::backoff::{RandomSource, ThreadRandom};
use crate::circuit_breaker::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::errors::ConfigError;
use crate::events::{EventSink, NoOpEventSink};
use crate::outcome::{Classifier, Signal};
use crate::retry::RetryController;
use crate::timeout::TimeoutGuard;

/// Builder for creating validated pipelines.
///
/// Retry and breaker each need a classifier. Either supply one explicitly or
/// call [`with_configured_rules`](Self::with_configured_rules) to use the
/// `should_handle` rule sets from the configuration.
pub struct PipelineBuilder<T, E> {
    name: String,
    config: PipelineConfig,
    retry_classifier: Option<Arc<dyn Classifier<T, E>>>,
    breaker_classifier: Option<Arc<dyn Classifier<T, E>>>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    events: Arc<dyn EventSink>,
}

impl<T, E> PipelineBuilder<T, E> {
    /// Creates a builder for the given configuration.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            name: "default".to_string(),
            config,
            retry_classifier: None,
            breaker_classifier: None,
            clock: Arc::new(SystemClock),
            random: Arc::new(ThreadRandom),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the pipeline name used in spans, logs and events.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the classifier deciding which outcomes are retried.
    #[must_use]
    pub fn with_retry_classifier(mut self, classifier: impl Classifier<T, E> + 'static) -> Self {
        self.retry_classifier = Some(Arc::new(classifier));
        self
    }

    /// Sets the classifier deciding which outcomes count against the breaker.
    #[must_use]
    pub fn with_breaker_classifier(mut self, classifier: impl Classifier<T, E> + 'static) -> Self {
        self.breaker_classifier = Some(Arc::new(classifier));
        self
    }

    /// Sets the clock driving the breaker's window, its break duration and retry timing.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the random source used for jitter.
    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Sets the event sink shared by every policy.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Validates the configuration and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for out-of-range settings and
    /// `ConfigError::MissingClassifier` if a policy has no classifier.
    pub fn build(self) -> Result<Pipeline<T, E>, ConfigError> {
        self.config.validate()?;
        let retry_classifier = self
            .retry_classifier
            .ok_or(ConfigError::MissingClassifier { policy: "retry" })?;
        let breaker_classifier = self
            .breaker_classifier
            .ok_or(ConfigError::MissingClassifier {
                policy: "circuit_breaker",
            })?;

        let breaker = CircuitBreaker::new(self.config.circuit_breaker)
            .with_name(self.name.clone())
            .with_clock(self.clock.clone())
            .with_event_sink(self.events.clone());
        let retry = RetryController::new(self.config.retry, retry_classifier)
            .with_random(self.random)
            .with_clock(self.clock)
            .with_event_sink(self.events.clone());

        Ok(Pipeline {
            name: self.name,
            breaker,
            retry,
            timeout: TimeoutGuard::from_config(&self.config.timeout),
            breaker_classifier,
            events: self.events,
        })
    }
}

impl<T: Signal, E: Signal> PipelineBuilder<T, E> {
    /// Fills any classifier not set explicitly from the configured rule sets.
    #[must_use]
    pub fn with_configured_rules(mut self) -> Self {
        if self.retry_classifier.is_none() {
            self.retry_classifier = Some(Arc::new(self.config.retry.should_handle.clone()));
        }
        if self.breaker_classifier.is_none() {
            self.breaker_classifier = Some(Arc::new(self.config.circuit_breaker.should_handle.clone()));
        }
        self
    }
}

impl<T, E> std::fmt::Debug for PipelineBuilder<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("retry_classifier", &self.retry_classifier.is_some())
            .field("breaker_classifier", &self.breaker_classifier.is_some())
            .finish_non_exhaustive()
    }
}
