use super::errors::ExecutionError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure raised by a task body.
pub type TaskFailure = BoxError;

/// What a task body returns.
pub type TaskResult<T> = Result<T, TaskFailure>;

/// What awaiting a task or async value returns.
pub type ExecResult<T> = Result<T, ExecutionError>;
