//! The unit of work a pipeline protects.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::cancellation::CancellationToken;

/// An asynchronous call against an unreliable dependency.
///
/// The pipeline may call it several times per invocation, once per attempt.
/// The token is cancelled when the attempt times out or the caller gives up;
/// implementations should stop work when it fires.
#[async_trait]
pub trait Operation<T, E>: Send + Sync {
    /// Runs one attempt.
    async fn call(&self, cancel: CancellationToken) -> Result<T, E>;
}

#[async_trait]
impl<T, E, O> Operation<T, E> for &O
where
    O: Operation<T, E> + ?Sized,
    T: Send + 'static,
    E: Send + 'static,
{
    async fn call(&self, cancel: CancellationToken) -> Result<T, E> {
        (**self).call(cancel).await
    }
}

#[async_trait]
impl<T, E, O> Operation<T, E> for Arc<O>
where
    O: Operation<T, E> + ?Sized,
    T: Send + 'static,
    E: Send + 'static,
{
    async fn call(&self, cancel: CancellationToken) -> Result<T, E> {
        (**self).call(cancel).await
    }
}

/// An [`Operation`] built from a closure. See [`from_fn`].
#[derive(Debug, Clone)]
pub struct FnOperation<F> {
    f: F,
}

/// Wraps a closure returning a future as an [`Operation`].
///
/// ```rust,ignore
/// let op = from_fn(|_cancel| async { client.get("todos/1").await });
/// pipeline.invoke(op, &token).await?;
/// ```
pub fn from_fn<F>(f: F) -> FnOperation<F> {
    FnOperation { f }
}

#[async_trait]
impl<T, E, F, Fut> Operation<T, E> for FnOperation<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    async fn call(&self, cancel: CancellationToken) -> Result<T, E> {
        (self.f)(cancel).await
    }
}
