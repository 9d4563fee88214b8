//! Resilience events.
//!
//! Policies report what they do through an [`EventSink`] owned by the
//! pipeline. Event types are dotted names; payloads are JSON objects stamped
//! with an RFC 3339 `timestamp`.

mod sink;

pub use sink::{
    CollectingEventSink, EventSink, FanOutEventSink, LoggingEventSink, NoOpEventSink, RecordedEvent,
};

use chrono::{SecondsFormat, Utc};
use tracing::Level;

/// A handled failure will be retried after a delay.
pub const RETRY_SCHEDULED: &str = "retry.scheduled";
/// The last allowed attempt was a handled failure.
pub const RETRY_EXHAUSTED: &str = "retry.exhausted";
/// An attempt exceeded its budget.
pub const ATTEMPT_TIMED_OUT: &str = "attempt.timed_out";
/// The breaker moved to `Open`.
pub const BREAKER_OPENED: &str = "breaker.opened";
/// The breaker moved to `HalfOpen`.
pub const BREAKER_HALF_OPENED: &str = "breaker.half_opened";
/// The breaker moved to `Closed`.
pub const BREAKER_CLOSED: &str = "breaker.closed";
/// The breaker was manually isolated.
pub const BREAKER_ISOLATED: &str = "breaker.isolated";
/// The breaker rejected an invocation.
pub const PIPELINE_REJECTED: &str = "pipeline.rejected";
/// The caller cancelled an invocation.
pub const PIPELINE_CANCELLED: &str = "pipeline.cancelled";
/// An invocation finished with a result or a classified failure.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";

/// The log level an event type deserves.
#[must_use]
pub fn severity(event_type: &str) -> Level {
    match event_type {
        BREAKER_OPENED | BREAKER_ISOLATED | RETRY_EXHAUSTED => Level::WARN,
        BREAKER_CLOSED | BREAKER_HALF_OPENED | PIPELINE_CANCELLED => Level::INFO,
        RETRY_SCHEDULED | ATTEMPT_TIMED_OUT | PIPELINE_REJECTED | PIPELINE_COMPLETED => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Adds a `timestamp` field to an event payload.
#[must_use]
pub fn stamped(mut data: serde_json::Value) -> serde_json::Value {
    if let serde_json::Value::Object(ref mut map) = data {
        map.insert(
            "timestamp".to_string(),
            serde_json::Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamped_adds_timestamp() {
        let data = stamped(serde_json::json!({"attempt": 1}));
        let ts = data["timestamp"].as_str().unwrap();
        assert!(ts.ends_with('Z'));
        assert_eq!(data["attempt"], 1);
    }

    #[test]
    fn test_severity() {
        assert_eq!(severity(BREAKER_OPENED), Level::WARN);
        assert_eq!(severity(BREAKER_CLOSED), Level::INFO);
        assert_eq!(severity(RETRY_SCHEDULED), Level::DEBUG);
        assert_eq!(severity("custom.event"), Level::TRACE);
    }

    #[test]
    fn test_stamped_ignores_non_objects() {
        assert_eq!(stamped(serde_json::json!(5)), serde_json::json!(5));
    }
}
