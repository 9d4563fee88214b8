//! Observability utilities.

mod tracing;

pub use tracing::{InvocationSpanAttributes, SpanTimer};
