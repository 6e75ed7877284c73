//! Error taxonomy of the execution and reliability layer.
//!
//! Four kinds, each its own type so callers can match on them:
//!
//! - [`ValidationError`] — malformed input, raised before any side effect.
//! - [`ExecutionError`] — a task or producer failed while running.
//! - [`InterruptedError`] — the caller's cancellation token fired during a wait.
//! - [`ResourceAccessError`] — reading, opening or closing a line source failed.
//!
//! [`Error`] unifies them for operations that can raise more than one kind.

use std::io;
use thiserror::Error;

use super::result::{BoxError, TaskFailure};

/// Malformed or out-of-range input.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn position_suffix(position: &Option<usize>) -> String {
    match position {
        Some(p) => format!(" at position {p}"),
        None => String::new(),
    }
}

/// # Failures raised while running submitted work.
///
/// `position` is filled in by the dispatcher with the index of the task in its
/// batch; standalone handles and async values leave it `None`.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The task returned an error. `source()` is the task's own failure.
    #[error("task{} failed", position_suffix(.position))]
    Failed {
        position: Option<usize>,
        #[source]
        source: TaskFailure,
    },

    /// The task panicked; the panic payload is kept as text.
    #[error("task{} panicked: {message}", position_suffix(.position))]
    Panicked {
        position: Option<usize>,
        message: String,
    },

    /// Forced termination dropped or aborted the task before it produced a value.
    #[error("task{} was cancelled before completing", position_suffix(.position))]
    Cancelled { position: Option<usize> },

    /// The execution context is draining or stopped and refused the task.
    #[error("execution context is not accepting tasks")]
    Rejected,
}

impl ExecutionError {
    pub fn failed(source: impl Into<TaskFailure>) -> Self {
        ExecutionError::Failed {
            position: None,
            source: source.into(),
        }
    }

    /// Tags the error with the batch position of the task that raised it.
    pub fn at(self, index: usize) -> Self {
        match self {
            ExecutionError::Failed { source, .. } => ExecutionError::Failed {
                position: Some(index),
                source,
            },
            ExecutionError::Panicked { message, .. } => ExecutionError::Panicked {
                position: Some(index),
                message,
            },
            ExecutionError::Cancelled { .. } => ExecutionError::Cancelled {
                position: Some(index),
            },
            ExecutionError::Rejected => ExecutionError::Rejected,
        }
    }

    pub fn position(&self) -> Option<usize> {
        match self {
            ExecutionError::Failed { position, .. }
            | ExecutionError::Panicked { position, .. }
            | ExecutionError::Cancelled { position } => *position,
            ExecutionError::Rejected => None,
        }
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecutionError::Failed { .. } => "task_failed",
            ExecutionError::Panicked { .. } => "task_panicked",
            ExecutionError::Cancelled { .. } => "task_cancelled",
            ExecutionError::Rejected => "task_rejected",
        }
    }
}

/// The waiting caller's cancellation token fired.
///
/// The token is left cancelled, so the caller still observes its own signal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("interrupted while waiting for {waiting_for}")]
pub struct InterruptedError {
    waiting_for: &'static str,
}

impl InterruptedError {
    pub fn new(waiting_for: &'static str) -> Self {
        Self { waiting_for }
    }

    pub fn waiting_for(&self) -> &'static str {
        self.waiting_for
    }
}

/// Recoverable failure while accessing a line source.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ResourceAccessError {
    #[error("failed to open {target}")]
    Open {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read lines")]
    Read {
        #[source]
        source: io::Error,
    },

    #[error("failed to close line source")]
    Close {
        #[source]
        source: io::Error,
    },

    #[error("no runbook step for {key}")]
    Missing { key: String },
}

impl ResourceAccessError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ResourceAccessError::Open { .. } => "resource_open",
            ResourceAccessError::Read { .. } => "resource_read",
            ResourceAccessError::Close { .. } => "resource_close",
            ResourceAccessError::Missing { .. } => "resource_missing",
        }
    }
}

/// Any error raised by this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Interrupted(#[from] InterruptedError),

    #[error(transparent)]
    ResourceAccess(#[from] ResourceAccessError),
}

impl Error {
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Execution(e) => e.as_label(),
            Error::Interrupted(_) => "interrupted",
            Error::ResourceAccess(e) => e.as_label(),
        }
    }
}
