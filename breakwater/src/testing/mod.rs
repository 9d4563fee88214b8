//! Testing utilities for breakwater pipelines.
//!
//! This module provides:
//! - Scripted, slow and counting operations
//! - Assertions for pipeline results

mod assertions;
mod mocks;

pub use assertions::{
    assert_cancelled, assert_circuit_open, assert_retries_exhausted, assert_succeeded,
    assert_timed_out,
};
pub use mocks::{CountingOperation, ScriptedOperation, SlowOperation, Step};
