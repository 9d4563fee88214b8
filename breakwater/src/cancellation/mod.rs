//! Cooperative cancellation.
//!
//! A single [`CancellationToken`] is passed through the whole call chain
//! (pipeline, retry, timeout, operation). Each attempt receives a child token
//! that the timeout guard cancels when the attempt runs out of time.

mod token;

pub use token::{CancelCallback, CancellationToken};
