use super::{
    errors::{ExecutionError, ValidationError},
    handle::{Job, TaskHandle},
    model::{PoolMetrics, PoolState, Task, Work},
    parse::parse_with_fallback,
    result::ExecResult,
    shutdown::ShutdownPolicy,
};
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use crossbeam::deque::Injector;
use futures::FutureExt;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

pub const THREADS_ENV: &str = "INCIDENT_POOL_THREADS";
pub const DRAIN_TIMEOUT_ENV: &str = "INCIDENT_POOL_DRAIN_TIMEOUT_MS";

/// Конфигурация пула: число воркеров и бюджет на graceful drain.
#[derive(Debug, Clone)]
pub struct Config {
    pub num_threads: usize,
    pub drain_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get() * 2, // notification fan-out is mostly I/O
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        Self {
            num_threads: num_cpus::get(),
            drain_timeout: Duration::from_secs(60),
        }
    }

    pub fn io_bound() -> Self {
        Self {
            num_threads: num_cpus::get() * 4,
            drain_timeout: Duration::from_secs(30),
        }
    }

    /// Builds a config from string settings, starting from [`Config::default`].
    ///
    /// An invalid thread count falls back to the default. The drain timeout
    /// controls blocking behavior, so a malformed value is an error instead.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let num_threads = parse_with_fallback(
            lookup(THREADS_ENV).as_deref(),
            defaults.num_threads,
            |n: &usize| *n > 0,
        );
        let drain_timeout = match lookup(DRAIN_TIMEOUT_ENV) {
            Some(raw) => ShutdownPolicy::parse_millis(Some(&raw))?.timeout(),
            None => defaults.drain_timeout,
        };
        Ok(Self { num_threads, drain_timeout })
    }

    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        ShutdownPolicy::new(self.drain_timeout)
    }
}

/// Owned handle to a pool. Dropping the last clone forces termination.
pub type ExecutionContext = Arc<WorkerPool>;

/// State shared with the worker loops.
struct Shared {
    inject: Injector<Job>,
    notify: Notify,
    stop: CancellationToken,
    idle_workers: AtomicUsize,
}

impl Shared {
    fn next_job(&self) -> Option<Job> {
        std::iter::repeat_with(|| self.inject.steal())
            .find(|s| !s.is_retry())
            .and_then(|s| s.success())
    }
}

/// Counters captured by every job. Kept apart from [`Shared`] so queued jobs
/// never hold the queue that holds them.
#[derive(Default)]
struct TaskCounters {
    active: AtomicUsize,
    total_submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    drained: Notify,
}

impl TaskCounters {
    fn enter(self: &Arc<Self>) -> ActiveGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        self.total_submitted.fetch_add(1, Ordering::Relaxed);
        ActiveGuard { counters: Arc::clone(self), recorded: false }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Counts a task as active until its job completes or is dropped unpolled.
struct ActiveGuard {
    counters: Arc<TaskCounters>,
    recorded: bool,
}

impl ActiveGuard {
    fn record(&mut self, ok: bool) {
        let counter = if ok { &self.counters.completed } else { &self.counters.failed };
        counter.fetch_add(1, Ordering::Relaxed);
        self.recorded = true;
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if !self.recorded {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        if self.counters.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.counters.drained.notify_waiters();
        }
    }
}

/// Пул async-воркеров поверх общей очереди crossbeam.
///
/// Each worker runs one job at a time, so `num_threads` bounds parallelism.
pub struct WorkerPool {
    shared: Arc<Shared>,
    counters: Arc<TaskCounters>,
    state: AtomicU8,
    force: CancellationToken,
    config: Config,
}

impl WorkerPool {
    /// Must be called inside a Tokio runtime; workers are spawned on it.
    pub fn new(num_threads: usize) -> ExecutionContext {
        Self::with_config(Config {
            num_threads,
            ..Default::default()
        })
    }

    pub fn with_config(mut config: Config) -> ExecutionContext {
        config.num_threads = config.num_threads.max(1);

        let shared = Arc::new(Shared {
            inject: Injector::new(),
            notify: Notify::new(),
            stop: CancellationToken::new(),
            idle_workers: AtomicUsize::new(0),
        });

        for id in 0..config.num_threads {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                worker_loop(shared, id).await;
            });
        }
        debug!(workers = config.num_threads, "execution context started");

        Arc::new(WorkerPool {
            shared,
            counters: Arc::new(TaskCounters::default()),
            state: AtomicU8::new(PoolState::Running as u8),
            force: CancellationToken::new(),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_accepting(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Queues a task. Fails with [`ExecutionError::Rejected`] once draining has begun.
    pub fn submit<T>(&self, task: Task<T>) -> Result<TaskHandle<T>, ExecutionError>
    where
        T: Send + 'static,
    {
        if !self.is_accepting() {
            warn!(state = self.state().as_label(), "task rejected");
            return Err(ExecutionError::Rejected);
        }

        let (tx, rx) = oneshot::channel::<ExecResult<T>>();
        let mut guard = self.counters.enter();
        let force = self.force.clone();

        let job: Job = Box::pin(async move {
            let outcome = tokio::select! {
                biased;
                _ = force.cancelled() => Err(ExecutionError::Cancelled { position: None }),
                outcome = run_work(task.work) => outcome,
            };
            guard.record(outcome.is_ok());
            let _ = tx.send(outcome);
        });

        self.push_job(job);
        Ok(TaskHandle::new(rx))
    }

    #[inline(always)]
    fn push_job(&self, job: Job) {
        self.shared.inject.push(job);
        if self.shared.idle_workers.load(Ordering::SeqCst) > 0 {
            self.shared.notify.notify_one();
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            state: self.state(),
            workers: self.config.num_threads,
            idle_workers: self.shared.idle_workers.load(Ordering::Relaxed),
            active_tasks: self.counters.active.load(Ordering::Relaxed),
            queued_tasks: self.shared.inject.len(),
            total_submitted: self.counters.total_submitted.load(Ordering::Relaxed),
            completed_tasks: self.counters.completed.load(Ordering::Relaxed),
            failed_tasks: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// `Running -> Draining`. Returns false if draining had already begun.
    pub(crate) fn begin_drain(&self) -> bool {
        let moved = self
            .state
            .compare_exchange(
                PoolState::Running as u8,
                PoolState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if moved {
            debug!(active = self.counters.active.load(Ordering::Relaxed), "execution context draining");
        }
        moved
    }

    /// Completes once every submitted task has finished or been dropped.
    pub(crate) async fn wait_drained(&self) {
        self.counters.wait_idle().await;
    }

    /// `Draining -> Terminated`; idle workers exit.
    pub(crate) fn mark_terminated(&self) {
        let _ = self.state.compare_exchange(
            PoolState::Draining as u8,
            PoolState::Terminated as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.shared.stop.cancel();
        debug!("execution context terminated");
    }

    /// Moves to `Forced`: running tasks are asked to stop, queued tasks are dropped.
    pub(crate) fn force_stop(&self) {
        self.state.store(PoolState::Forced as u8, Ordering::Release);
        self.force.cancel();
        self.shared.stop.cancel();

        let mut dropped = 0usize;
        while let Some(job) = self.shared.next_job() {
            drop(job);
            dropped += 1;
        }
        debug!(dropped, "execution context forced");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.state().is_stopped() {
            self.force_stop();
        }
    }
}

async fn worker_loop(shared: Arc<Shared>, id: usize) {
    trace!(worker = id, "worker started");
    loop {
        if shared.stop.is_cancelled() {
            break;
        }

        if let Some(job) = shared.next_job() {
            job.await;
            continue;
        }

        shared.idle_workers.fetch_add(1, Ordering::SeqCst);
        if !shared.inject.is_empty() {
            shared.idle_workers.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        tokio::select! {
            _ = shared.notify.notified() => {}
            _ = shared.stop.cancelled() => {
                shared.idle_workers.fetch_sub(1, Ordering::SeqCst);
                break;
            }
        }
        shared.idle_workers.fetch_sub(1, Ordering::SeqCst);
    }
    trace!(worker = id, "worker stopped");
}

async fn run_work<T>(work: Work<T>) -> ExecResult<T>
where
    T: Send + 'static,
{
    match work {
        Work::Future(fut) => match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(ExecutionError::failed(source)),
            Err(payload) => Err(ExecutionError::Panicked {
                position: None,
                message: panic_message(payload.as_ref()),
            }),
        },
        Work::Blocking(f) => match tokio::task::spawn_blocking(f).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(ExecutionError::failed(source)),
            Err(join_err) if join_err.is_panic() => Err(ExecutionError::Panicked {
                position: None,
                message: panic_message(join_err.into_panic().as_ref()),
            }),
            Err(_) => Err(ExecutionError::Cancelled { position: None }),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
