//! Test assertions for pipeline results.

use std::fmt::Debug;

use crate::circuit_breaker::CircuitState;
use crate::errors::{PipelineError, PipelineResult};

/// Asserts that the invocation succeeded and returns its value.
pub fn assert_succeeded<T: Debug, E: Debug>(result: PipelineResult<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("Expected success, got error: {e:?}"),
    }
}

/// Asserts that retries were exhausted after exactly `attempts` attempts.
pub fn assert_retries_exhausted<T: Debug, E: Debug>(result: &PipelineResult<T, E>, attempts: u32) {
    match result {
        Err(PipelineError::RetriesExhausted(e)) => assert_eq!(
            e.attempts, attempts,
            "Expected {attempts} attempts, got {}",
            e.attempts
        ),
        other => panic!("Expected RetriesExhausted, got {other:?}"),
    }
}

/// Asserts that the breaker rejected the call in the given state.
pub fn assert_circuit_open<T: Debug, E: Debug>(result: &PipelineResult<T, E>, state: CircuitState) {
    match result {
        Err(PipelineError::CircuitOpen(e)) => assert_eq!(
            e.state, state,
            "Expected rejection in state {state}, got {}",
            e.state
        ),
        other => panic!("Expected CircuitOpen, got {other:?}"),
    }
}

/// Asserts that the invocation ended in an unhandled timeout.
pub fn assert_timed_out<T: Debug, E: Debug>(result: &PipelineResult<T, E>) {
    assert!(
        matches!(result, Err(PipelineError::Timeout(_))),
        "Expected Timeout, got {result:?}"
    );
}

/// Asserts that the invocation was cancelled.
pub fn assert_cancelled<T: Debug, E: Debug>(result: &PipelineResult<T, E>) {
    assert!(
        matches!(result, Err(PipelineError::Cancelled(_))),
        "Expected Cancelled, got {result:?}"
    );
}
