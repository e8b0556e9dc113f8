use std::sync::Arc;
use std::time::Duration;

use drover_server::actor::{ActorHandle, ActorSystem};
use log::warn;
use tokio::sync::oneshot;

use crate::error::{ExecutionError, ExecutionResult};
use crate::pool::core::PoolActor;
use crate::pool::state::PoolStatus;
use crate::pool::{PoolEvent, PoolOptions};
use crate::task::{TaskResult, TaskSpec};

/// The owning handle to a task pool.
/// The pool actor and its workers run in the background; the handle is the
/// client-facing surface for submitting tasks and collecting results.
pub struct PoolHandle {
    system: ActorSystem,
    handle: ActorHandle<PoolActor>,
    result_poll_interval: Duration,
    worker_stop_timeout: Duration,
}

impl PoolHandle {
    pub fn new(options: PoolOptions) -> Self {
        let result_poll_interval = options.result_poll_interval;
        let worker_stop_timeout = options.worker_stop_timeout;
        let mut system = ActorSystem::new();
        let handle = system.spawn::<PoolActor>(options);
        Self {
            system,
            handle,
            result_poll_interval,
            worker_stop_timeout,
        }
    }

    /// Launches the pool workers. Tasks may be submitted both before and
    /// after the pool starts; tasks submitted before starting take part in
    /// auto-sizing.
    pub async fn start(&self) -> ExecutionResult<()> {
        let (tx, rx) = oneshot::channel();
        self.handle.send(PoolEvent::Start { result: tx }).await?;
        rx.await?
    }

    /// Submits a task and returns its UID.
    pub async fn add_task(&self, spec: TaskSpec) -> ExecutionResult<String> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .send(PoolEvent::AddTask { spec, result: tx })
            .await?;
        rx.await?
    }

    /// Returns the final result of a task, or [None] if it has not
    /// finished yet. Polling a finished task repeatedly returns the
    /// same result.
    pub async fn poll_result(&self, task_uid: &str) -> ExecutionResult<Option<TaskResult>> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .send(PoolEvent::PollResult {
                task_uid: task_uid.to_string(),
                result: tx,
            })
            .await?;
        rx.await?
    }

    /// Waits until the task finishes and returns its final result.
    pub async fn wait_for_result(&self, task_uid: &str) -> ExecutionResult<TaskResult> {
        loop {
            if let Some(result) = self.poll_result(task_uid).await? {
                return Ok(result);
            }
            tokio::time::sleep(self.result_poll_interval).await;
        }
    }

    /// Installs a predicate consulted after every task completion to decide
    /// whether the task should be rescheduled. The decision is always
    /// bounded by the retry budget.
    pub async fn set_reschedule_check<F>(&self, check: F) -> ExecutionResult<()>
    where
        F: Fn(&PoolStatus, &TaskResult) -> bool + Send + Sync + 'static,
    {
        self.handle
            .send(PoolEvent::SetRescheduleCheck {
                check: Arc::new(check),
            })
            .await?;
        Ok(())
    }

    pub async fn status(&self) -> ExecutionResult<PoolStatus> {
        let (tx, rx) = oneshot::channel();
        self.handle
            .send(PoolEvent::ObserveStatus { result: tx })
            .await?;
        rx.await.map_err(ExecutionError::from)
    }

    /// Stops the pool and all its workers, waiting for the shutdown
    /// to complete.
    pub async fn stop(mut self) -> ExecutionResult<()> {
        let _ = self.handle.send(PoolEvent::Shutdown).await;
        let stopped = self.handle.clone().wait_for_stop();
        if tokio::time::timeout(self.worker_stop_timeout, stopped)
            .await
            .is_err()
        {
            warn!("the pool did not stop within the timeout");
            return Ok(());
        }
        self.system.join().await;
        Ok(())
    }
}
