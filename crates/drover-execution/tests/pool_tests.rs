use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover_execution::error::{ExecutionError, ExecutionResult};
use drover_execution::worker_manager::{
    InProcessWorkerManager, WorkerLaunchOptions, WorkerManager, WorkerTransportMode,
};
use drover_execution::{
    PoolHandle, PoolOptions, PoolRunState, PoolSize, TaskFailure, TaskHandlerRegistry, TaskInput,
    TaskOutcome, TaskSpec, TaskTarget, TaskValue, WorkerId, WorkerStateKind,
};
use serde_json::{json, Value};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn registry() -> Arc<TaskHandlerRegistry> {
    let mut registry = TaskHandlerRegistry::new();
    registry.register("demo", "add", |input: TaskInput| {
        let sum = input.args.iter().filter_map(Value::as_i64).sum::<i64>();
        Ok(TaskValue::Json(json!(sum)))
    });
    registry.register("demo", "fail", |_: TaskInput| {
        Err(TaskFailure::new("failure", "boom"))
    });
    registry.register("demo", "address", |_: TaskInput| {
        Ok(TaskValue::opaque(std::net::Ipv4Addr::new(10, 0, 0, 1)))
    });
    Arc::new(registry)
}

fn options(registry: Arc<TaskHandlerRegistry>, size: usize) -> PoolOptions {
    PoolOptions::new(Arc::new(InProcessWorkerManager::new(registry)))
        .with_size(PoolSize::Fixed(size))
        .with_result_poll_interval(Duration::from_millis(10))
}

fn add_spec(value: i64) -> TaskSpec {
    TaskSpec::new(TaskTarget::new("demo", "add"))
        .with_input(TaskInput::with_args(vec![json!(value), json!(1)]))
}

#[tokio::test]
async fn test_fixed_pool_runs_tasks() {
    init();
    let pool = PoolHandle::new(options(registry(), 4));
    pool.start().await.unwrap();
    let mut uids = vec![];
    for i in 0..9 {
        uids.push(pool.add_task(add_spec(i)).await.unwrap());
    }
    for (i, uid) in uids.iter().enumerate() {
        let result = pool.wait_for_result(uid).await.unwrap();
        assert_eq!(result.assign_count, 1);
        assert_eq!(
            result.outcome,
            TaskOutcome::Passed {
                value: json!(i as i64 + 1)
            }
        );
    }
    let status = pool.status().await.unwrap();
    assert_eq!(status.state, PoolRunState::Passed);
    assert!(status.success);
    assert_eq!(status.total_tasks, 9);
    assert_eq!(status.finished_tasks, 9);
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_task_uid_assignment() {
    init();
    let pool = PoolHandle::new(options(registry(), 1));
    pool.start().await.unwrap();
    let uid = pool
        .add_task(add_spec(1).with_uid("my-task"))
        .await
        .unwrap();
    assert_eq!(uid, "my-task");
    let generated = pool.add_task(add_spec(2)).await.unwrap();
    assert!(generated.starts_with("task-"));
    assert!(matches!(
        pool.add_task(add_spec(3).with_uid("my-task")).await,
        Err(ExecutionError::InvalidArgument(_))
    ));
    assert!(matches!(
        pool.poll_result("no-such-task").await,
        Err(ExecutionError::InvalidArgument(_))
    ));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_opaque_value_is_stringified() {
    init();
    let pool = PoolHandle::new(options(registry(), 1));
    pool.start().await.unwrap();
    let uid = pool
        .add_task(TaskSpec::new(TaskTarget::new("demo", "address")))
        .await
        .unwrap();
    let result = pool.wait_for_result(&uid).await.unwrap();
    assert_eq!(
        result.outcome,
        TaskOutcome::Passed {
            value: json!("10.0.0.1")
        }
    );
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_target_fails_the_task() {
    init();
    let pool = PoolHandle::new(options(registry(), 1).with_task_retries_limit(1));
    pool.start().await.unwrap();
    let uid = pool
        .add_task(TaskSpec::new(TaskTarget::new("demo", "missing")))
        .await
        .unwrap();
    let result = pool.wait_for_result(&uid).await.unwrap();
    assert!(matches!(result.outcome, TaskOutcome::Error { .. }));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_failing_task_exhausts_retry_budget() {
    init();
    let pool = PoolHandle::new(options(registry(), 1).with_task_retries_limit(3));
    pool.start().await.unwrap();
    let uid = pool
        .add_task(TaskSpec::new(TaskTarget::new("demo", "fail")))
        .await
        .unwrap();
    let result = pool.wait_for_result(&uid).await.unwrap();
    assert_eq!(result.assign_count, 3);
    match result.outcome {
        TaskOutcome::Error { message } => {
            assert!(message.contains("retry budget exhausted"));
            assert!(message.contains("boom"));
        }
        x => panic!("unexpected outcome: {x:?}"),
    }
    let status = pool.status().await.unwrap();
    assert_eq!(status.state, PoolRunState::Error);
    assert!(!status.success);
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_rerun_bounds_the_retry_budget() {
    init();
    let pool = PoolHandle::new(options(registry(), 1).with_task_retries_limit(5));
    pool.start().await.unwrap();
    let uid = pool
        .add_task(TaskSpec::new(TaskTarget::new("demo", "fail")).with_rerun(1))
        .await
        .unwrap();
    let result = pool.wait_for_result(&uid).await.unwrap();
    // One initial attempt plus one rerun.
    assert_eq!(result.assign_count, 2);
    assert!(matches!(result.outcome, TaskOutcome::Error { .. }));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_flaky_task_passes_on_retry() {
    init();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let mut registry = TaskHandlerRegistry::new();
    registry.register("demo", "flaky", move |_: TaskInput| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(TaskFailure::new("failure", "first attempt fails"))
        } else {
            Ok(TaskValue::Json(json!("ok")))
        }
    });
    let pool = PoolHandle::new(options(Arc::new(registry), 1));
    pool.start().await.unwrap();
    let uid = pool
        .add_task(TaskSpec::new(TaskTarget::new("demo", "flaky")))
        .await
        .unwrap();
    let result = pool.wait_for_result(&uid).await.unwrap();
    assert_eq!(result.assign_count, 2);
    assert_eq!(
        result.outcome,
        TaskOutcome::Passed {
            value: json!("ok")
        }
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_panicking_task_is_reported_as_failure() {
    init();
    let mut registry = TaskHandlerRegistry::new();
    registry.register("demo", "panic", |_: TaskInput| -> Result<TaskValue, TaskFailure> {
        panic!("handler exploded");
    });
    let pool = PoolHandle::new(options(Arc::new(registry), 1).with_task_retries_limit(1));
    pool.start().await.unwrap();
    let uid = pool
        .add_task(TaskSpec::new(TaskTarget::new("demo", "panic")))
        .await
        .unwrap();
    let result = pool.wait_for_result(&uid).await.unwrap();
    match result.outcome {
        TaskOutcome::Error { message } => assert!(message.contains("handler exploded")),
        x => panic!("unexpected outcome: {x:?}"),
    }
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_reschedule_check_reruns_a_passing_task() {
    init();
    let pool = PoolHandle::new(options(registry(), 1));
    pool.set_reschedule_check(|_, result| result.assign_count < 2)
        .await
        .unwrap();
    pool.start().await.unwrap();
    let uid = pool.add_task(add_spec(1)).await.unwrap();
    let result = pool.wait_for_result(&uid).await.unwrap();
    assert_eq!(result.assign_count, 2);
    assert_eq!(result.outcome, TaskOutcome::Passed { value: json!(2) });
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_reschedule_check_is_bounded_by_the_retry_budget() {
    init();
    let pool = PoolHandle::new(options(registry(), 1).with_task_retries_limit(3));
    pool.set_reschedule_check(|_, _| true).await.unwrap();
    pool.start().await.unwrap();
    let uid = pool.add_task(add_spec(1)).await.unwrap();
    let result = pool.wait_for_result(&uid).await.unwrap();
    // The check wants another run but the budget is exhausted; a passing
    // outcome is kept rather than turned into an error.
    assert_eq!(result.assign_count, 3);
    assert_eq!(result.outcome, TaskOutcome::Passed { value: json!(2) });
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_lost_worker_task_is_rescheduled() {
    init();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let mut registry = TaskHandlerRegistry::new();
    registry.register("demo", "slow-once", move |_: TaskInput| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_secs(5));
        }
        Ok(TaskValue::Json(json!("done")))
    });
    let manager = Arc::new(InProcessWorkerManager::new(Arc::new(registry)));
    let options = PoolOptions::new(manager.clone())
        .with_size(PoolSize::Fixed(2))
        .with_worker_heartbeat(Duration::from_millis(50), 2)
        .with_result_poll_interval(Duration::from_millis(10));
    let pool = PoolHandle::new(options);
    pool.start().await.unwrap();
    let uid = pool
        .add_task(TaskSpec::new(TaskTarget::new("demo", "slow-once")))
        .await
        .unwrap();
    let busy = find_busy_worker(&pool, &uid).await;
    manager.stop_worker(busy).await.unwrap();
    let result = pool.wait_for_result(&uid).await.unwrap();
    assert_eq!(result.assign_count, 2);
    assert_eq!(
        result.outcome,
        TaskOutcome::Passed {
            value: json!("done")
        }
    );
    let status = pool.status().await.unwrap();
    assert!(status
        .workers
        .iter()
        .any(|x| x.state == WorkerStateKind::Failed));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_pool_fails_when_all_workers_are_lost() {
    init();
    let mut registry = TaskHandlerRegistry::new();
    registry.register("demo", "slow", |_: TaskInput| {
        std::thread::sleep(Duration::from_secs(5));
        Ok(TaskValue::null())
    });
    let manager = Arc::new(InProcessWorkerManager::new(Arc::new(registry)));
    let options = PoolOptions::new(manager.clone())
        .with_size(PoolSize::Fixed(1))
        .with_worker_heartbeat(Duration::from_millis(50), 2)
        .with_result_poll_interval(Duration::from_millis(10));
    let pool = PoolHandle::new(options);
    pool.start().await.unwrap();
    let uid = pool
        .add_task(TaskSpec::new(TaskTarget::new("demo", "slow")))
        .await
        .unwrap();
    let busy = find_busy_worker(&pool, &uid).await;
    manager.stop_worker(busy).await.unwrap();
    let result = pool.wait_for_result(&uid).await.unwrap();
    match result.outcome {
        TaskOutcome::Error { message } => assert!(message.contains("no workers available")),
        x => panic!("unexpected outcome: {x:?}"),
    }
    let status = pool.status().await.unwrap();
    assert_eq!(status.state, PoolRunState::Error);
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_task_added_after_total_worker_loss_is_failed() {
    init();
    let mut registry = TaskHandlerRegistry::new();
    registry.register("demo", "slow", |_: TaskInput| {
        std::thread::sleep(Duration::from_secs(5));
        Ok(TaskValue::null())
    });
    let manager = Arc::new(InProcessWorkerManager::new(Arc::new(registry)));
    let options = PoolOptions::new(manager.clone())
        .with_size(PoolSize::Fixed(1))
        .with_worker_heartbeat(Duration::from_millis(50), 2)
        .with_result_poll_interval(Duration::from_millis(10));
    let pool = PoolHandle::new(options);
    pool.start().await.unwrap();
    let first = pool
        .add_task(TaskSpec::new(TaskTarget::new("demo", "slow")))
        .await
        .unwrap();
    let busy = find_busy_worker(&pool, &first).await;
    manager.stop_worker(busy).await.unwrap();
    let result = pool.wait_for_result(&first).await.unwrap();
    assert!(matches!(result.outcome, TaskOutcome::Error { .. }));
    // The pool has no workers left, so a late submission must settle
    // instead of sitting in the queue forever.
    let late = pool
        .add_task(TaskSpec::new(TaskTarget::new("demo", "slow")))
        .await
        .unwrap();
    let result = tokio::time::timeout(Duration::from_secs(3), pool.wait_for_result(&late))
        .await
        .unwrap()
        .unwrap();
    match result.outcome {
        TaskOutcome::Error { message } => assert!(message.contains("no workers available")),
        x => panic!("unexpected outcome: {x:?}"),
    }
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_worker_loss_reschedules_even_when_check_declines() {
    init();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let mut registry = TaskHandlerRegistry::new();
    registry.register("demo", "slow-once", move |_: TaskInput| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_secs(5));
        }
        Ok(TaskValue::Json(json!("done")))
    });
    let manager = Arc::new(InProcessWorkerManager::new(Arc::new(registry)));
    let options = PoolOptions::new(manager.clone())
        .with_size(PoolSize::Fixed(2))
        .with_worker_heartbeat(Duration::from_millis(50), 2)
        .with_result_poll_interval(Duration::from_millis(10));
    let pool = PoolHandle::new(options);
    // The check applies to worker-reported completions only; losing a
    // worker mid-flight still reassigns the task.
    pool.set_reschedule_check(|_, _| false).await.unwrap();
    pool.start().await.unwrap();
    let uid = pool
        .add_task(TaskSpec::new(TaskTarget::new("demo", "slow-once")))
        .await
        .unwrap();
    let busy = find_busy_worker(&pool, &uid).await;
    manager.stop_worker(busy).await.unwrap();
    let result = pool.wait_for_result(&uid).await.unwrap();
    assert_eq!(result.assign_count, 2);
    assert_eq!(
        result.outcome,
        TaskOutcome::Passed {
            value: json!("done")
        }
    );
    pool.stop().await.unwrap();
}

/// A worker manager that accepts launch requests but never actually
/// starts a worker.
struct IdleWorkerManager;

#[tonic::async_trait]
impl WorkerManager for IdleWorkerManager {
    fn mode(&self) -> WorkerTransportMode {
        WorkerTransportMode::InProcess
    }

    async fn launch_worker(
        &self,
        _id: WorkerId,
        _options: WorkerLaunchOptions,
    ) -> ExecutionResult<()> {
        Ok(())
    }

    async fn stop_worker(&self, _id: WorkerId) -> ExecutionResult<()> {
        Ok(())
    }

    async fn stop(&self) -> ExecutionResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_worker_launch_timeout_fails_the_pool() {
    init();
    let options = PoolOptions::new(Arc::new(IdleWorkerManager))
        .with_size(PoolSize::Fixed(1))
        .with_worker_launch_timeout(Duration::from_millis(100))
        .with_result_poll_interval(Duration::from_millis(10));
    let pool = PoolHandle::new(options);
    pool.start().await.unwrap();
    let uid = pool.add_task(add_spec(1)).await.unwrap();
    let result = pool.wait_for_result(&uid).await.unwrap();
    match result.outcome {
        TaskOutcome::Error { message } => assert!(message.contains("no workers available")),
        x => panic!("unexpected outcome: {x:?}"),
    }
    let status = pool.status().await.unwrap();
    assert_eq!(status.state, PoolRunState::Error);
    assert!(status
        .workers
        .iter()
        .all(|x| x.state == WorkerStateKind::Failed));
    pool.stop().await.unwrap();
}

/// A worker manager for external processes that are never started,
/// used to exercise submission-time validation.
struct UnreachableWorkerManager;

#[tonic::async_trait]
impl WorkerManager for UnreachableWorkerManager {
    fn mode(&self) -> WorkerTransportMode {
        WorkerTransportMode::External
    }

    async fn launch_worker(
        &self,
        _id: WorkerId,
        _options: WorkerLaunchOptions,
    ) -> ExecutionResult<()> {
        Ok(())
    }

    async fn stop_worker(&self, _id: WorkerId) -> ExecutionResult<()> {
        Ok(())
    }

    async fn stop(&self) -> ExecutionResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_entry_point_targets_are_rejected_for_external_workers() {
    init();
    let pool = PoolHandle::new(PoolOptions::new(Arc::new(UnreachableWorkerManager)));
    assert!(matches!(
        pool.add_task(TaskSpec::new(TaskTarget::new("__main__", "f")))
            .await,
        Err(ExecutionError::InvalidArgument(_))
    ));
    // Targets in named modules are accepted; the same registry can be
    // built by the worker program.
    assert!(pool.add_task(add_spec(1)).await.is_ok());
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn test_auto_sized_pool_counts_workers_from_weights() {
    init();
    let options = PoolOptions::new(Arc::new(InProcessWorkerManager::new(registry())))
        .with_size(PoolSize::Auto)
        .with_auto_task_runtime_limit(15)
        .with_result_poll_interval(Duration::from_millis(10));
    let pool = PoolHandle::new(options);
    let mut uids = vec![];
    for i in 0..3 {
        uids.push(pool.add_task(add_spec(i).with_weight(10)).await.unwrap());
    }
    pool.start().await.unwrap();
    // Each task weighs 10 against a per-worker limit of 15, so no two
    // tasks share a worker.
    let status = pool.status().await.unwrap();
    assert_eq!(status.workers.len(), 3);
    for uid in &uids {
        let result = pool.wait_for_result(uid).await.unwrap();
        assert!(result.outcome.is_passed());
    }
    pool.stop().await.unwrap();
}

async fn find_busy_worker(pool: &PoolHandle, uid: &str) -> WorkerId {
    for _ in 0..500 {
        let status = pool.status().await.unwrap();
        if let Some(worker) = status
            .workers
            .iter()
            .find(|x| x.active_task.as_deref() == Some(uid))
        {
            return worker.worker_id;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no worker picked up task {uid}");
}
