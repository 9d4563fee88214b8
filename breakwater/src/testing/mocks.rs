//! Mock operations for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::operation::Operation;

/// One scripted attempt: an optional delay, then a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<T, E> {
    /// How long the attempt takes.
    pub delay: Duration,
    /// What the attempt returns.
    pub result: Result<T, E>,
}

impl<T, E> Step<T, E> {
    /// An attempt that succeeds immediately.
    #[must_use]
    pub fn ok(value: T) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(value),
        }
    }

    /// An attempt that fails immediately.
    #[must_use]
    pub fn err(error: E) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    /// Makes the attempt take `delay`.
    #[must_use]
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicUsize,
    completed: AtomicUsize,
}

/// Counts an attempt as completed unless it is dropped first.
struct CompletionGuard<'a> {
    counters: &'a Counters,
    done: bool,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            self.counters.completed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// An operation that plays back scripted steps, then repeats a fallback.
///
/// `calls()` counts attempts started; `completed()` counts attempts that
/// ran to the end rather than being abandoned by a timeout or cancellation.
#[derive(Debug)]
pub struct ScriptedOperation<T, E> {
    steps: Mutex<VecDeque<Step<T, E>>>,
    fallback: Step<T, E>,
    counters: Counters,
}

impl<T: Clone, E: Clone> ScriptedOperation<T, E> {
    /// Creates an operation playing `steps` in order, then `fallback` forever.
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = Step<T, E>>, fallback: Step<T, E>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback,
            counters: Counters::default(),
        }
    }

    /// An operation that always succeeds with `value`.
    #[must_use]
    pub fn always_ok(value: T) -> Self {
        Self::new([], Step::ok(value))
    }

    /// An operation that always fails with `error`.
    #[must_use]
    pub fn always_err(error: E) -> Self {
        Self::new([], Step::err(error))
    }

    /// Returns the number of attempts started.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    /// Returns the number of attempts that ran to completion.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step<T, E> {
        self.steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl<T, E> Operation<T, E> for ScriptedOperation<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn call(&self, _cancel: CancellationToken) -> Result<T, E> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.next_step();
        let mut guard = CompletionGuard {
            counters: &self.counters,
            done: false,
        };
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        guard.done = true;
        step.result
    }
}

/// An operation that sleeps, then succeeds, unless its token fires first.
///
/// Records whether it observed cancellation, so tests can check that timed
/// out attempts are told to stop.
#[derive(Debug)]
pub struct SlowOperation<T> {
    delay: Duration,
    value: T,
    observed_cancel: Arc<AtomicUsize>,
}

impl<T: Clone> SlowOperation<T> {
    /// Creates an operation that takes `delay` and returns `value`.
    #[must_use]
    pub fn new(delay: Duration, value: T) -> Self {
        Self {
            delay,
            value,
            observed_cancel: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns how many attempts saw their token cancelled.
    #[must_use]
    pub fn observed_cancellations(&self) -> usize {
        self.observed_cancel.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T, E> Operation<T, E> for SlowOperation<T>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    async fn call(&self, cancel: CancellationToken) -> Result<T, E> {
        let observed = self.observed_cancel.clone();
        cancel.on_cancel(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(self.delay).await;
        Ok(self.value.clone())
    }
}

/// Wraps another operation and counts its calls.
#[derive(Debug)]
pub struct CountingOperation<O> {
    inner: O,
    calls: AtomicUsize,
}

impl<O> CountingOperation<O> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the wrapped operation.
    #[must_use]
    pub fn inner(&self) -> &O {
        &self.inner
    }
}

#[async_trait]
impl<T, E, O> Operation<T, E> for CountingOperation<O>
where
    O: Operation<T, E>,
    T: Send + 'static,
    E: Send + 'static,
{
    async fn call(&self, cancel: CancellationToken) -> Result<T, E> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.call(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::from_fn;

    #[tokio::test(start_paused = true)]
    async fn test_scripted_plays_steps_then_fallback() {
        let op = ScriptedOperation::new(
            [Step::err("boom".to_string()), Step::ok(1u16).after(Duration::from_secs(1))],
            Step::ok(2),
        );

        assert_eq!(op.call(CancellationToken::new()).await, Err("boom".to_string()));
        assert_eq!(op.call(CancellationToken::new()).await, Ok(1));
        assert_eq!(op.call(CancellationToken::new()).await, Ok(2));
        assert_eq!(op.calls(), 3);
        assert_eq!(op.completed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_counts_abandoned_attempts() {
        let op = ScriptedOperation::<u16, String>::new([], Step::ok(1).after(Duration::from_secs(10)));

        let abandoned = tokio::time::timeout(Duration::from_secs(1), op.call(CancellationToken::new())).await;
        assert!(abandoned.is_err());
        assert_eq!(op.calls(), 1);
        assert_eq!(op.completed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_sees_cancellation() {
        let op = SlowOperation::new(Duration::from_secs(5), 200u16);
        let token = CancellationToken::new();
        token.cancel("stop");

        let result: Result<u16, String> = op.call(token).await;
        assert_eq!(result, Ok(200));
        assert_eq!(op.observed_cancellations(), 1);
    }

    #[tokio::test]
    async fn test_counting_operation() {
        let op = CountingOperation::new(from_fn(|_| async { Ok::<u16, String>(204) }));
        op.call(CancellationToken::new()).await.unwrap();
        op.call(CancellationToken::new()).await.unwrap();
        assert_eq!(op.calls(), 2);
    }
}
