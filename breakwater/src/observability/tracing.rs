//! Span attributes for pipeline invocations.
//!
//! The pipeline opens a `tracing` span per invocation and records these
//! attributes on completion. `to_otel_attributes` flattens them with
//! OpenTelemetry-style dotted keys for callers that forward spans elsewhere.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Instant;

use crate::circuit_breaker::CircuitState;

/// Attributes describing one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationSpanAttributes {
    /// Pipeline name.
    pub pipeline: String,
    /// Invocation ID.
    pub invocation_id: Option<String>,
    /// Attempts made.
    pub attempts: Option<u32>,
    /// Final result kind (`success`, `operation`, `timeout`, ...).
    pub outcome: Option<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: Option<f64>,
    /// Breaker state after the invocation.
    pub breaker_state: Option<CircuitState>,
}

impl InvocationSpanAttributes {
    /// Creates attributes for the named pipeline.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            ..Default::default()
        }
    }

    /// Sets the invocation ID.
    #[must_use]
    pub fn with_invocation_id(mut self, id: impl Into<String>) -> Self {
        self.invocation_id = Some(id.into());
        self
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Sets the outcome kind.
    #[must_use]
    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Sets the breaker state.
    #[must_use]
    pub fn with_breaker_state(mut self, state: CircuitState) -> Self {
        self.breaker_state = Some(state);
        self
    }

    /// Converts to OpenTelemetry attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();

        attrs.insert("pipeline.name".to_string(), self.pipeline.clone());

        if let Some(ref v) = self.invocation_id {
            attrs.insert("pipeline.invocation_id".to_string(), v.clone());
        }
        if let Some(v) = self.attempts {
            attrs.insert("pipeline.attempts".to_string(), v.to_string());
        }
        if let Some(ref v) = self.outcome {
            attrs.insert("pipeline.outcome".to_string(), v.clone());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("pipeline.duration_ms".to_string(), v.to_string());
        }
        if let Some(v) = self.breaker_state {
            attrs.insert("breaker.state".to_string(), v.to_string());
        }

        attrs
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_otel_attributes() {
        let attrs = InvocationSpanAttributes::new("orders")
            .with_invocation_id("abc")
            .with_attempts(3)
            .with_outcome("retries_exhausted")
            .with_breaker_state(CircuitState::HalfOpen)
            .to_otel_attributes();

        assert_eq!(attrs["pipeline.name"], "orders");
        assert_eq!(attrs["pipeline.invocation_id"], "abc");
        assert_eq!(attrs["pipeline.attempts"], "3");
        assert_eq!(attrs["pipeline.outcome"], "retries_exhausted");
        assert_eq!(attrs["breaker.state"], "half_open");
        assert!(!attrs.contains_key("pipeline.duration_ms"));
    }

    #[test]
    fn test_attributes_serialize() {
        let attrs = InvocationSpanAttributes::new("orders").with_breaker_state(CircuitState::Open);
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json["breaker_state"], "open");
    }

    #[tokio::test(start_paused = true)]
    async fn test_span_timer() {
        let timer = SpanTimer::start("invoke");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(timer.name(), "invoke");
        assert!(timer.finish() >= 250.0);
    }
}
