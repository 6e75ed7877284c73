//! Composable async values backed by pool tasks.
//!
//! A producer is submitted to the pool as soon as it is scheduled. The
//! combinators only describe what happens after it resolves, so building a
//! pipeline never blocks and never occupies a pool worker. `combine` cannot
//! deadlock even on a single-worker pool, since both inputs are queued before
//! anything awaits them.

use super::{
    errors::{Error, ExecutionError, InterruptedError, ValidationError},
    model::Task,
    parse::require_non_blank,
    pool::ExecutionContext,
    result::{ExecResult, TaskResult},
};
use futures::{
    future::{self, BoxFuture},
    FutureExt, TryFutureExt,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio_util::sync::CancellationToken;

/// A value that becomes available later. It resolves exactly once, to a value
/// or an [`ExecutionError`].
#[must_use = "an async value does nothing unless resolved"]
pub struct AsyncValue<T> {
    inner: BoxFuture<'static, ExecResult<T>>,
}

impl<T: Send + 'static> AsyncValue<T> {
    pub fn ready(value: T) -> Self {
        Self { inner: future::ready(Ok(value)).boxed() }
    }

    pub fn failed(error: ExecutionError) -> Self {
        Self { inner: future::ready(Err(error)).boxed() }
    }

    /// Transforms the value once it resolves.
    pub fn map<U, F>(self, f: F) -> AsyncValue<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        AsyncValue { inner: self.inner.map_ok(f).boxed() }
    }

    /// Chains a dependent async step.
    pub fn sequence<U, F>(self, f: F) -> AsyncValue<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> AsyncValue<U> + Send + 'static,
    {
        AsyncValue { inner: self.inner.and_then(move |value| f(value).inner).boxed() }
    }

    /// Joins two independent values with `f` once both resolve.
    pub fn combine<U, R, F>(self, other: AsyncValue<U>, f: F) -> AsyncValue<R>
    where
        U: Send + 'static,
        R: Send + 'static,
        F: FnOnce(T, U) -> R + Send + 'static,
    {
        let joined = future::try_join(self.inner, other.inner);
        AsyncValue { inner: joined.map_ok(move |(a, b)| f(a, b)).boxed() }
    }

    pub async fn resolve(self) -> ExecResult<T> {
        self.inner.await
    }

    /// Like [`AsyncValue::resolve`], but gives up when `cancel` fires. The
    /// token is left cancelled.
    pub async fn resolve_or_interrupt(self, cancel: &CancellationToken) -> Result<T, Error> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InterruptedError::new("async value").into()),
            outcome = self.inner => outcome.map_err(Error::from),
        }
    }
}

impl<T> Future for AsyncValue<T> {
    type Output = ExecResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.as_mut().poll(cx)
    }
}

/// Schedules a blocking producer on `pool`. A pool that no longer accepts
/// work yields a value that resolves to [`ExecutionError::Rejected`].
pub fn schedule_async<T, F>(producer: F, pool: &ExecutionContext) -> AsyncValue<T>
where
    T: Send + 'static,
    F: FnOnce() -> TaskResult<T> + Send + 'static,
{
    from_task(Task::blocking(producer), pool)
}

/// Schedules an async producer on `pool`.
pub fn schedule_future<T, Fut>(producer: Fut, pool: &ExecutionContext) -> AsyncValue<T>
where
    T: Send + 'static,
    Fut: Future<Output = TaskResult<T>> + Send + 'static,
{
    from_task(Task::new(producer), pool)
}

fn from_task<T: Send + 'static>(task: Task<T>, pool: &ExecutionContext) -> AsyncValue<T> {
    match pool.submit(task) {
        Ok(handle) => AsyncValue { inner: handle.boxed() },
        Err(e) => AsyncValue::failed(e),
    }
}

/// `"open-runbook:<service>"` with the service id trimmed and lower-cased.
pub fn fetch_runbook_step(
    service_id: &str,
    pool: &ExecutionContext,
) -> Result<AsyncValue<String>, ValidationError> {
    let service = require_non_blank(Some(service_id), "serviceId")?.to_string();
    Ok(schedule_async(move || Ok(format!("open-runbook:{}", service.to_lowercase())), pool))
}

/// `"ESCALATE <ID> via on-call"`, built by two chained transformations.
pub fn build_escalation_message(
    incident_id: &str,
    pool: &ExecutionContext,
) -> Result<AsyncValue<String>, ValidationError> {
    let raw = require_non_blank(Some(incident_id), "incidentId")?.to_string();
    Ok(schedule_async(move || Ok(raw.to_uppercase()), pool)
        .map(|id| format!("ESCALATE {id}"))
        .map(|message| message + " via on-call"))
}

/// Sum of the trimmed lengths of two service ids, computed in parallel.
pub fn combined_error_budget_burn(
    primary_service_id: &str,
    secondary_service_id: &str,
    pool: &ExecutionContext,
) -> Result<AsyncValue<usize>, ValidationError> {
    let primary = require_non_blank(Some(primary_service_id), "primaryServiceId")?.to_string();
    let secondary = require_non_blank(Some(secondary_service_id), "secondaryServiceId")?.to_string();

    let primary = schedule_async(move || Ok(primary.len()), pool);
    let secondary = schedule_async(move || Ok(secondary.len()), pool);
    Ok(primary.combine(secondary, |a, b| a + b))
}
