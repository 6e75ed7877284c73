use super::{
    errors::{Error, ExecutionError, InterruptedError},
    result::ExecResult,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Type-erased unit of work queued on the pool.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle to the outcome of one submitted task.
///
/// Dropping the handle does not cancel the task; the pool keeps running it.
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<ExecResult<T>>,
}

impl<T> TaskHandle<T> {
    pub fn new(receiver: oneshot::Receiver<ExecResult<T>>) -> Self {
        Self { receiver }
    }

    /// Waits for the outcome unless `cancel` fires first.
    ///
    /// An already-cancelled token interrupts immediately. The token is never reset.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<T, Error> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InterruptedError::new("task result").into()),
            outcome = self => outcome.map_err(Error::from),
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = ExecResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            // the sender only disappears without a value when the job was dropped
            Poll::Ready(res) => Poll::Ready(res.unwrap_or(Err(ExecutionError::Cancelled { position: None }))),
            Poll::Pending => Poll::Pending,
        }
    }
}
