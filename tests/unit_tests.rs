#[cfg(test)]
mod tests {
    use incident_pool::{
        dispatch, dispatch_fire_and_forget,
        errors::{Error, ExecutionError},
        pipeline::{build_escalation_message, combined_error_budget_burn, fetch_runbook_step},
        schedule_async, schedule_future,
        shutdown::shutdown_and_await_millis,
        shutdown_and_await, AsyncValue, PoolState, ShutdownPolicy, Task, WorkerPool,
    };
    use std::{
        collections::HashSet,
        fmt,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::{Duration, Instant},
    };
    use tokio_util::sync::CancellationToken;

    #[derive(Debug)]
    struct Boom(&'static str);

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom: {}", self.0)
        }
    }

    impl std::error::Error for Boom {}

    fn sleeper(ms: u64, value: usize) -> Task<usize> {
        Task::new(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispatch_preserves_submission_order() {
        let pool = WorkerPool::new(4);
        let cancel = CancellationToken::new();

        // later tasks finish first
        let tasks: Vec<_> = (0..6).map(|i| sleeper((6 - i as u64) * 20, i)).collect();
        let results = dispatch(tasks, &pool, &cancel).await.unwrap();

        assert_eq!(results, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_dispatch_empty_batch() {
        let pool = WorkerPool::new(2);
        let cancel = CancellationToken::new();

        let results = dispatch(Vec::<Task<usize>>::new(), &pool, &cancel).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispatch_failure_waits_for_rest_of_batch() {
        let pool = WorkerPool::new(4);
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<Task<usize>> = (0..5)
            .map(|i| {
                let finished = finished.clone();
                Task::new(async move {
                    if i == 1 {
                        return Err(Boom("task 1").into());
                    }
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(i)
                })
            })
            .collect();

        let err = dispatch(tasks, &pool, &cancel).await.unwrap_err();
        assert_eq!(finished.load(Ordering::SeqCst), 4, "other tasks must run to completion");

        match err {
            Error::Execution(ExecutionError::Failed { position, source }) => {
                assert_eq!(position, Some(1));
                let boom = source.downcast_ref::<Boom>().expect("task failure kept as cause");
                assert_eq!(boom.0, "task 1");
            }
            other => panic!("expected task failure, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispatch_reports_first_failure_by_submission_order() {
        let pool = WorkerPool::new(4);
        let cancel = CancellationToken::new();

        let tasks: Vec<Task<usize>> = vec![
            Task::new(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err(Boom("slow").into())
            }),
            sleeper(10, 1),
            Task::new(async { Err(Boom("fast").into()) }),
        ];

        let err = dispatch(tasks, &pool, &cancel).await.unwrap_err();
        match err {
            Error::Execution(ExecutionError::Failed { position, source }) => {
                assert_eq!(position, Some(0));
                assert_eq!(source.to_string(), "boom: slow");
            }
            other => panic!("expected task failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_catches_panics() {
        let pool = WorkerPool::new(2);
        let cancel = CancellationToken::new();

        let tasks: Vec<Task<usize>> = vec![
            sleeper(1, 0),
            Task::blocking(|| panic!("worker exploded")),
        ];

        let err = dispatch(tasks, &pool, &cancel).await.unwrap_err();
        match err {
            Error::Execution(ExecutionError::Panicked { position, message }) => {
                assert_eq!(position, Some(1));
                assert!(message.contains("worker exploded"));
            }
            other => panic!("expected panic, got {other:?}"),
        }
        assert!(pool.metrics().failed_tasks >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispatch_interrupted_keeps_token_and_task() {
        let pool = WorkerPool::new(2);
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = finished.clone();
        let tasks = vec![Task::new(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1usize)
        })];

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = dispatch(tasks, &pool, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Interrupted(_)), "got {err:?}");
        assert!(cancel.is_cancelled(), "cancellation must stay visible to the caller");

        // the running task is not cancelled by the interrupted wait
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_stopped_pool() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();
        assert!(shutdown_and_await(&pool, ShutdownPolicy::new(Duration::from_secs(1)), &cancel).await);

        let err = dispatch(vec![sleeper(1, 1)], &pool, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_fire_and_forget_normalizes_identifiers() {
        let pool = WorkerPool::new(2);
        let cancel = CancellationToken::new();
        let delivered = Arc::new(Mutex::new(Vec::new()));

        let sink = delivered.clone();
        let count = dispatch_fire_and_forget(
            &["inc-1001", " INC-1002 "],
            &pool,
            move |id| {
                sink.lock().unwrap().push(id);
                Ok(())
            },
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(count, 2);
        let delivered: HashSet<String> = delivered.lock().unwrap().iter().cloned().collect();
        let expected: HashSet<String> = ["INC-1001", "INC-1002"].iter().map(|s| s.to_string()).collect();
        assert_eq!(delivered, expected);
    }

    #[tokio::test]
    async fn test_fire_and_forget_validates_before_any_effect() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let err = dispatch_fire_and_forget(
            &["INC-1", " "],
            &pool,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Validation(_)), "got {err:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(pool.metrics().total_submitted, 0);
    }

    #[tokio::test]
    async fn test_fire_and_forget_wraps_effect_failure() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();

        let err = dispatch_fire_and_forget(
            &["INC-1"],
            &pool,
            |_| Err(Boom("notifier").into()),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Execution(ExecutionError::Failed { .. })), "got {err:?}");
    }

    #[tokio::test]
    async fn test_pipeline_domain_values() {
        let pool = WorkerPool::new(2);

        let runbook = fetch_runbook_step(" Payments-Api ", &pool).unwrap();
        let message = build_escalation_message(" inc-9001 ", &pool).unwrap();
        let burn = combined_error_budget_burn("payments-api", "identity-api", &pool).unwrap();

        assert_eq!(runbook.resolve().await.unwrap(), "open-runbook:payments-api");
        assert_eq!(message.resolve().await.unwrap(), "ESCALATE INC-9001 via on-call");
        assert_eq!(burn.resolve().await.unwrap(), 24);

        assert!(fetch_runbook_step(" ", &pool).is_err());
        assert!(build_escalation_message("", &pool).is_err());
        assert!(combined_error_budget_burn("payments-api", "  ", &pool).is_err());
    }

    #[tokio::test]
    async fn test_combine_on_single_worker_does_not_deadlock() {
        let pool = WorkerPool::new(1);

        let a = schedule_async(|| Ok(20usize), &pool);
        let b = schedule_future(async { Ok(22usize) }, &pool);
        let sum = tokio::time::timeout(Duration::from_secs(2), a.combine(b, |x, y| x + y))
            .await
            .expect("combine must not deadlock");
        assert_eq!(sum.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_sequence_schedules_dependent_step() {
        let pool = WorkerPool::new(1);
        let inner_pool = pool.clone();

        let value = schedule_async(|| Ok(" inc-7 ".to_string()), &pool)
            .map(|raw| raw.trim().to_string())
            .sequence(move |id| schedule_async(move || Ok(format!("{}!", id.to_uppercase())), &inner_pool));

        let resolved = tokio::time::timeout(Duration::from_secs(2), value).await.unwrap();
        assert_eq!(resolved.unwrap(), "INC-7!");
    }

    #[tokio::test]
    async fn test_pipeline_surfaces_producer_failure() {
        let pool = WorkerPool::new(1);
        let mapped = Arc::new(AtomicUsize::new(0));

        let counter = mapped.clone();
        let value: AsyncValue<usize> = schedule_async(|| Err(Boom("producer").into()), &pool).map(move |v: usize| {
            counter.fetch_add(1, Ordering::SeqCst);
            v
        });

        match value.resolve().await {
            Err(ExecutionError::Failed { source, .. }) => assert_eq!(source.to_string(), "boom: producer"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(mapped.load(Ordering::SeqCst), 0);

        let combined = AsyncValue::ready(1usize).combine(AsyncValue::<usize>::failed(ExecutionError::Rejected), |a, b| a + b);
        assert!(matches!(combined.resolve().await, Err(ExecutionError::Rejected)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_combine_runs_branches_in_parallel() {
        let pool = WorkerPool::new(2);
        let delay = Duration::from_millis(200);

        let start = Instant::now();
        let a = schedule_async(move || { std::thread::sleep(delay); Ok(1usize) }, &pool);
        let b = schedule_async(move || { std::thread::sleep(delay); Ok(2usize) }, &pool);
        assert_eq!(a.combine(b, |x, y| x + y).resolve().await.unwrap(), 3);
        let parallel = start.elapsed();

        let start = Instant::now();
        let a = schedule_async(move || { std::thread::sleep(delay); Ok(1usize) }, &pool).resolve().await.unwrap();
        let b = schedule_async(move || { std::thread::sleep(delay); Ok(2usize) }, &pool).resolve().await.unwrap();
        assert_eq!(a + b, 3);
        let sequential = start.elapsed();

        println!("  combine: {:?}, sequential: {:?}", parallel, sequential);
        assert!(sequential >= delay * 2);
        assert!(parallel < sequential);
    }

    #[tokio::test]
    async fn test_resolve_or_interrupt() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let value = schedule_future(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1usize)
            },
            &pool,
        );
        let err = value.resolve_or_interrupt(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Interrupted(_)));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_drains_cleanly() {
        let pool = WorkerPool::new(2);
        let cancel = CancellationToken::new();

        let handles: Vec<_> = (0..4).map(|i| pool.submit(sleeper(30, i)).unwrap()).collect();
        assert!(shutdown_and_await(&pool, ShutdownPolicy::new(Duration::from_secs(2)), &cancel).await);
        assert_eq!(pool.state(), PoolState::Terminated);

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), i, "queued work finishes during drain");
        }
        assert!(matches!(pool.submit(sleeper(1, 0)), Err(ExecutionError::Rejected)));
    }

    #[tokio::test]
    async fn test_shutdown_idle_pool_with_zero_timeout() {
        let pool = WorkerPool::new(2);
        let cancel = CancellationToken::new();
        assert!(shutdown_and_await(&pool, ShutdownPolicy::new(Duration::ZERO), &cancel).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_forces_after_timeout() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();

        let running = pool.submit(sleeper(10_000, 1)).unwrap();
        let queued = pool.submit(sleeper(1, 2)).unwrap();

        let start = Instant::now();
        let drained = shutdown_and_await(&pool, ShutdownPolicy::new(Duration::from_millis(100)), &cancel).await;
        assert!(!drained);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(pool.state(), PoolState::Forced);

        assert!(matches!(running.await, Err(ExecutionError::Cancelled { .. })));
        assert!(matches!(queued.await, Err(ExecutionError::Cancelled { .. })));
        assert!(matches!(pool.submit(sleeper(1, 3)), Err(ExecutionError::Rejected)));
    }

    #[tokio::test]
    async fn test_shutdown_with_cancelled_caller() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();
        let _pending = pool.submit(sleeper(1_000, 1)).unwrap();
        cancel.cancel();

        let drained = shutdown_and_await(&pool, ShutdownPolicy::new(Duration::from_secs(5)), &cancel).await;
        assert!(!drained);
        assert!(cancel.is_cancelled(), "cancellation must never be swallowed");
        assert_eq!(pool.state(), PoolState::Forced);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_cancelled_during_drain() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();
        let running = pool.submit(sleeper(10_000, 1)).unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let drained = shutdown_and_await(&pool, ShutdownPolicy::new(Duration::from_secs(5)), &cancel).await;
        assert!(!drained);
        assert!(start.elapsed() < Duration::from_secs(2), "cancellation cuts the drain short");
        assert_eq!(pool.state(), PoolState::Forced);
        assert!(cancel.is_cancelled(), "cancellation must never be swallowed");
        assert!(matches!(running.await, Err(ExecutionError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_negative_timeout_before_state_change() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();

        assert!(shutdown_and_await_millis(&pool, -1, &cancel).await.is_err());
        assert_eq!(pool.state(), PoolState::Running);
        assert!(shutdown_and_await_millis(&pool, 500, &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_handle_wait_respects_cancellation() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();

        let quick = pool.submit(sleeper(5, 7)).unwrap();
        assert_eq!(quick.wait(&cancel).await.unwrap(), 7);

        let slow = pool.submit(sleeper(5_000, 8)).unwrap();
        let waiter = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waiter.cancel();
        });
        let err = slow.wait(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Interrupted(_)));
        assert_eq!(err.as_label(), "interrupted");
        assert!(cancel.is_cancelled());
    }
}
