//! # Breakwater
//!
//! Client-side resilience pipelines for calls against unreliable
//! dependencies.
//!
//! A pipeline wraps an asynchronous operation with three policies:
//!
//! - **Circuit breaking**: fail fast while the dependency is known to be down
//! - **Retry with backoff**: constant, linear or exponential delays with full jitter
//! - **Per-attempt timeouts**: bound every attempt and cancel the loser
//!
//! Callers get either the operation's value or a typed [`PipelineError`]
//! saying why there is none.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use breakwater::prelude::*;
//!
//! let config = PipelineConfig::default()
//!     .with_retry(RetryConfig::new().with_should_handle(ShouldHandle::status_codes([408, 429])));
//! let pipeline = Pipeline::<u16, String>::new(config)?;
//!
//! let status = pipeline
//!     .invoke(from_fn(|_cancel| async { fetch_status().await }), &CancellationToken::new())
//!     .await?;
//! ```
//!
//! [`PipelineError`]: errors::PipelineError

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

pub mod backoff;
pub mod cancellation;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod observability;
pub mod operation;
pub mod outcome;
pub mod pipeline;
pub mod retry;
pub mod testing;
pub mod timeout;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backoff::{BackoffType, RandomSource, SeededRandom, ThreadRandom};
    pub use crate::cancellation::CancellationToken;
    pub use crate::circuit_breaker::{BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitState};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{CircuitBreakerConfig, PipelineConfig, RetryConfig, TimeoutConfig};
    pub use crate::errors::{
        CancelledError, CircuitOpenError, ConfigError, PipelineError, PipelineResult,
        RetriesExhaustedError, TimeoutError,
    };
    pub use crate::events::{
        CollectingEventSink, EventSink, FanOutEventSink, LoggingEventSink, NoOpEventSink, RecordedEvent,
    };
    pub use crate::operation::{from_fn, FnOperation, Operation};
    pub use crate::outcome::{
        Classification, Classifier, FnClassifier, HandleRule, Outcome, ShouldHandle, Signal,
    };
    pub use crate::pipeline::{Pipeline, PipelineBuilder};
    pub use crate::retry::{AttemptContext, RetryController, RetryReport};
    pub use crate::timeout::TimeoutGuard;
}
