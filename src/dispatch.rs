//! Batch dispatch with submission-order results and a single surfaced failure.
//!
//! Every task is submitted before any is awaited. The dispatcher then waits
//! for the whole batch, even after a failure, so no task is abandoned. When
//! several tasks fail, the one earliest in submission order is reported.

use super::{
    errors::{Error, InterruptedError, ValidationError},
    handle::TaskHandle,
    model::Task,
    parse::normalize_identifier,
    pool::ExecutionContext,
    result::{ExecResult, TaskResult},
};
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs `tasks` on `pool` and returns their values in submission order.
///
/// Cancelling `cancel` stops the wait with [`InterruptedError`]; tasks already
/// running are left to finish on the pool.
pub async fn dispatch<T>(
    tasks: Vec<Task<T>>,
    pool: &ExecutionContext,
    cancel: &CancellationToken,
) -> Result<Vec<T>, Error>
where
    T: Send + 'static,
{
    if !pool.is_accepting() {
        return Err(ValidationError::new("pool must not be shut down").into());
    }

    let total = tasks.len();
    debug!(tasks = total, "dispatching batch");

    let mut handles = Vec::with_capacity(total);
    let mut rejected = None;
    for task in tasks {
        match pool.submit(task) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                rejected = Some(e);
                break;
            }
        }
    }

    let outcomes = await_all(handles, cancel, "task results").await?;
    let submitted = outcomes.len();

    let mut values = Vec::with_capacity(submitted);
    for (position, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(value) => values.push(value),
            Err(e) => {
                let e = e.at(position);
                warn!(position, total, error = %e, label = e.as_label(), "batch failed");
                return Err(e.into());
            }
        }
    }

    if let Some(e) = rejected {
        warn!(submitted, total, "batch cut short by shutdown");
        return Err(e.into());
    }

    debug!(tasks = total, "batch completed");
    Ok(values)
}

/// Normalizes every identifier (trim, upper-case), then runs `effect` once per
/// identifier on `pool`. Returns how many effects ran.
///
/// All identifiers are validated before the first effect is submitted.
pub async fn dispatch_fire_and_forget<S, F>(
    identifiers: &[S],
    pool: &ExecutionContext,
    effect: F,
    cancel: &CancellationToken,
) -> Result<usize, Error>
where
    S: AsRef<str>,
    F: Fn(String) -> TaskResult<()> + Send + Sync + 'static,
{
    let normalized = identifiers
        .iter()
        .map(|id| normalize_identifier(Some(id.as_ref())))
        .collect::<Result<Vec<_>, _>>()?;

    let effect = Arc::new(effect);
    let tasks = normalized
        .into_iter()
        .map(|id| {
            let effect = Arc::clone(&effect);
            Task::blocking(move || effect(id))
        })
        .collect();

    let done = dispatch(tasks, pool, cancel).await?;
    Ok(done.len())
}

async fn await_all<T>(
    handles: Vec<TaskHandle<T>>,
    cancel: &CancellationToken,
    waiting_for: &'static str,
) -> Result<Vec<ExecResult<T>>, InterruptedError> {
    let pending = handles.len();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!(pending, waiting_for, "interrupted while awaiting batch");
            Err(InterruptedError::new(waiting_for))
        }
        outcomes = join_all(handles) => Ok(outcomes),
    }
}
