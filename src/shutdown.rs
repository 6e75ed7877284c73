//! # Drain-then-force shutdown of an execution context.
//!
//! ```text
//! RUNNING ──begin_drain──► DRAINING ──all tasks done within timeout──► TERMINATED (true)
//!                              │
//!                              └──timeout elapsed / caller cancelled──► FORCED (false)
//! ```
//!
//! Callers must stop submitting before requesting shutdown; submissions that
//! race with draining are rejected, not queued.

use super::{
    errors::ValidationError,
    model::PoolState,
    parse::parse_or_fail,
    pool::ExecutionContext,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Requested drain budget. A `Duration` cannot be negative; the millisecond
/// constructors reject negative input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    timeout: Duration,
}

impl ShutdownPolicy {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_millis(millis: i64) -> Result<Self, ValidationError> {
        u64::try_from(millis)
            .map(|ms| Self::new(Duration::from_millis(ms)))
            .map_err(|_| ValidationError::new("timeoutMillis must be >= 0"))
    }

    pub fn parse_millis(raw: Option<&str>) -> Result<Self, ValidationError> {
        let millis = parse_or_fail(raw, "timeoutMillis", str::parse::<i64>)?;
        Self::from_millis(millis)
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Stops intake, waits up to the policy timeout for queued and running tasks,
/// then forces termination if they did not finish.
///
/// Returns `true` only for a clean drain. If `cancel` is already set, or fires
/// during the wait, the pool is forced and `false` is returned; the token stays
/// cancelled.
pub async fn shutdown_and_await(
    pool: &ExecutionContext,
    policy: ShutdownPolicy,
    cancel: &CancellationToken,
) -> bool {
    match pool.state() {
        PoolState::Terminated => return true,
        PoolState::Forced => return false,
        PoolState::Running | PoolState::Draining => {}
    }

    pool.begin_drain();

    if cancel.is_cancelled() {
        warn!("caller already cancelled; forcing shutdown");
        pool.force_stop();
        return false;
    }

    let timeout = policy.timeout();
    let drained = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        res = tokio::time::timeout(timeout, pool.wait_drained()) => Some(res.is_ok()),
    };

    match drained {
        Some(true) => {
            pool.mark_terminated();
            info!(?timeout, "execution context drained");
            true
        }
        Some(false) => {
            warn!(?timeout, active = pool.metrics().active_tasks, "drain timed out; forcing shutdown");
            pool.force_stop();
            false
        }
        None => {
            warn!(?timeout, "cancelled while draining; forcing shutdown");
            pool.force_stop();
            false
        }
    }
}

/// Millisecond form of [`shutdown_and_await`]. A negative timeout fails before
/// the pool changes state.
pub async fn shutdown_and_await_millis(
    pool: &ExecutionContext,
    timeout_millis: i64,
    cancel: &CancellationToken,
) -> Result<bool, ValidationError> {
    let policy = ShutdownPolicy::from_millis(timeout_millis)?;
    Ok(shutdown_and_await(pool, policy, cancel).await)
}
