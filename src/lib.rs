//! Исполнение задач и примитивы надёжности для incident-ops сервисов
//!
//! # Features
//! - Batch dispatch with submission-order results and first-failure reporting
//! - Composable async values (`map`, `sequence`, `combine`)
//! - Drain-then-force shutdown within a time budget
//! - Cancellation tokens instead of thread interrupt flags
//! - Scoped line sources closed exactly once on every exit path
//! - Fallback and fail-fast parsing of configuration strings

pub mod dispatch;
pub mod errors;
pub mod handle;
pub mod model;
pub mod parse;
pub mod pipeline;
pub mod pool;
pub mod resource;
pub mod result;
pub mod shutdown;

pub use dispatch::{dispatch, dispatch_fire_and_forget};
pub use errors::{Error, ExecutionError, InterruptedError, ResourceAccessError, ValidationError};
pub use model::{PoolMetrics, PoolState, Task};
pub use pipeline::{schedule_async, schedule_future, AsyncValue};
pub use pool::{Config, ExecutionContext, WorkerPool};
pub use resource::{read_lines, with_resource, LineSource};
pub use shutdown::{shutdown_and_await, ShutdownPolicy};
