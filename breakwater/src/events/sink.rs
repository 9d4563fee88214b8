//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, trace, warn, Level};

use super::severity;

/// Receives resilience events from a pipeline and its policies.
///
/// Breaker transitions are reported from synchronous code through
/// [`try_emit`](Self::try_emit); everything else may await [`emit`](Self::emit).
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "breaker.opened")
    /// * `data` - Optional event payload
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Emits an event without blocking.
    ///
    /// This method must never fail. Errors are logged but suppressed.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// Discards all events. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// Logs events through `tracing` at a severity chosen per event type.
///
/// Breaker openings and exhausted retries log at `WARN`, breaker recovery
/// at `INFO`, and per-attempt chatter at `DEBUG`. Events below
/// `min_level` are dropped.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    min_level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { min_level: Level::TRACE }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink logging events at `min_level` or more severe.
    #[must_use]
    pub fn with_min_level(min_level: Level) -> Self {
        Self { min_level }
    }

    /// Creates a sink that also logs per-attempt events.
    #[must_use]
    pub fn debug() -> Self {
        Self::with_min_level(Level::DEBUG)
    }

    /// Creates a sink logging state changes only.
    #[must_use]
    pub fn info() -> Self {
        Self::with_min_level(Level::INFO)
    }

    /// Returns true if events of this type pass the level filter.
    #[must_use]
    pub fn accepts(&self, event_type: &str) -> bool {
        // tracing orders levels by verbosity: TRACE > DEBUG > ... > ERROR
        severity(event_type) <= self.min_level
    }

    fn log_event(&self, event_type: &str, data: Option<&serde_json::Value>) {
        if !self.accepts(event_type) {
            return;
        }
        let level = severity(event_type);
        if level <= Level::WARN {
            warn!(event_type, event_data = ?data, "Resilience event");
        } else if level == Level::INFO {
            info!(event_type, event_data = ?data, "Resilience event");
        } else if level == Level::DEBUG {
            debug!(event_type, event_data = ?data, "Resilience event");
        } else {
            trace!(event_type, event_data = ?data, "Resilience event");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// Forwards every event to several sinks in order.
#[derive(Clone, Default)]
pub struct FanOutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanOutEventSink {
    /// Creates an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Returns the number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if there are no sinks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for FanOutEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutEventSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[async_trait]
impl EventSink for FanOutEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        for sink in &self.sinks {
            sink.emit(event_type, data.clone()).await;
        }
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        for sink in &self.sinks {
            sink.try_emit(event_type, data.clone());
        }
    }
}

/// One event captured by a [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// The event type.
    pub event_type: String,
    /// The payload, if any.
    pub data: Option<serde_json::Value>,
}

impl RecordedEvent {
    /// Returns a payload field, if present.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.as_ref().and_then(|data| data.get(key))
    }
}

/// Keeps every event in memory, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event types in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.event_type.clone()).collect()
    }

    /// Returns the events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Counts events of exactly this type.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Returns the most recent event of exactly this type.
    #[must_use]
    pub fn last(&self, event_type: &str) -> Option<RecordedEvent> {
        self.events
            .read()
            .iter()
            .rev()
            .find(|e| e.event_type == event_type)
            .cloned()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    fn record(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push(RecordedEvent {
            event_type: event_type.to_string(),
            data,
        });
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.record(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.record(event_type, data);
    }
}
