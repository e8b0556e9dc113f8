use std::mem;
use std::sync::Arc;

use drover_server::actor::{ActorAction, ActorContext};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::WorkerId;
use crate::pool::core::PoolActor;
use crate::pool::state::{WorkerDescriptor, WorkerState, WorkerStateKind};
use crate::pool::{PoolClient, PoolEvent, PoolSize, TaskStatus, WorkerChannel};
use crate::rpc::ClientOptions;
use crate::task::sizing::estimate_worker_count;
use crate::task::{TaskFailure, TaskOutcome, TaskResult, TaskSpec};
use crate::worker::WorkerClient;
use crate::worker_manager::{WorkerLaunchOptions, WorkerTransportMode};

/// The module name under which task handlers are registered by the pool
/// process itself. Such handlers do not exist in external worker processes.
const ENTRY_POINT_MODULE: &str = "__main__";

impl PoolActor {
    pub(super) fn handle_server_ready(
        &mut self,
        ctx: &mut ActorContext<Self>,
        port: u16,
        signal: oneshot::Sender<()>,
    ) -> ActorAction {
        info!("pool server is ready on port {port}");
        let server = mem::take(&mut self.server);
        self.server = match server.ready(signal, port) {
            Ok(x) => x,
            Err(e) => return ActorAction::fail(e),
        };
        if let Some(result) = self.pending_start.take() {
            return self.do_start(ctx, result);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_start(
        &mut self,
        ctx: &mut ActorContext<Self>,
        result: oneshot::Sender<ExecutionResult<()>>,
    ) -> ActorAction {
        if self.started {
            let _ = result.send(Err(ExecutionError::InvalidArgument(
                "the pool has already started".to_string(),
            )));
            return ActorAction::Continue;
        }
        // Launching external workers requires the pool address, so the
        // start request waits for the server to report its port.
        if self.options().worker_manager.mode() == WorkerTransportMode::External
            && self.server.port().is_none()
        {
            self.pending_start = Some(result);
            return ActorAction::Continue;
        }
        self.do_start(ctx, result)
    }

    fn do_start(
        &mut self,
        ctx: &mut ActorContext<Self>,
        result: oneshot::Sender<ExecutionResult<()>>,
    ) -> ActorAction {
        let count = match self.options().size {
            PoolSize::Fixed(x) => x,
            PoolSize::Auto => estimate_worker_count(
                &self.state.pending_task_weights(),
                self.options().auto_task_runtime_limit,
                self.options().worker_max_count,
            )
            .max(1),
        };
        if count == 0 {
            let _ = result.send(Err(ExecutionError::InvalidArgument(
                "the pool must start with at least one worker".to_string(),
            )));
            return ActorAction::Continue;
        }
        info!("starting the pool with {count} workers");
        self.started = true;
        for _ in 0..count {
            if let Err(e) = self.launch_worker(ctx) {
                let _ = result.send(Err(e));
                return ActorAction::fail("failed to launch pool workers");
            }
        }
        let _ = result.send(Ok(()));
        ActorAction::Continue
    }

    fn launch_worker(&mut self, ctx: &mut ActorContext<Self>) -> ExecutionResult<()> {
        let worker_id = self.state.next_worker_id()?;
        self.state.add_worker(
            worker_id,
            WorkerDescriptor {
                state: WorkerState::Pending,
                messages: vec![],
            },
        );
        let options = WorkerLaunchOptions {
            enable_tls: self.options().enable_tls,
            pool: PoolClient::Local(ctx.handle().clone()),
            pool_external_host: self.options().pool_external_host.clone(),
            pool_external_port: self
                .options()
                .pool_external_port
                .or_else(|| self.server.port())
                .unwrap_or(self.options().pool_listen_port),
            worker_heartbeat_interval: self.options().worker_heartbeat_interval,
            rpc_retry_strategy: self.options().rpc_retry_strategy.clone(),
        };
        let manager = Arc::clone(&self.options().worker_manager);
        ctx.spawn(async move {
            if let Err(e) = manager.launch_worker(worker_id, options).await {
                error!("failed to launch worker {worker_id}: {e}");
            }
        });
        ctx.send_with_delay(
            PoolEvent::ProbePendingWorker { worker_id },
            self.options().worker_launch_timeout,
        );
        Ok(())
    }

    pub(super) fn handle_add_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        spec: TaskSpec,
        result: oneshot::Sender<ExecutionResult<String>>,
    ) -> ActorAction {
        let _ = result.send(self.add_task(spec));
        if self.started {
            self.schedule_tasks(ctx);
            // All workers may have been retired before this task arrived.
            self.check_progress();
        }
        ActorAction::Continue
    }

    fn add_task(&mut self, spec: TaskSpec) -> ExecutionResult<String> {
        if self.options().worker_manager.mode() == WorkerTransportMode::External
            && spec.target.module == ENTRY_POINT_MODULE
        {
            return Err(ExecutionError::InvalidArgument(format!(
                "task handlers registered under the {ENTRY_POINT_MODULE} module \
                are not available in external workers"
            )));
        }
        let uid = match &spec.uid {
            Some(x) => x.clone(),
            None => self.state.next_task_uid(),
        };
        self.state.add_task(uid.clone(), spec)?;
        Ok(uid)
    }

    pub(super) fn handle_poll_result(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        task_uid: String,
        result: oneshot::Sender<ExecutionResult<Option<TaskResult>>>,
    ) -> ActorAction {
        let _ = result.send(self.state.task_result(&task_uid));
        ActorAction::Continue
    }

    pub(super) fn handle_register_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
        channel: WorkerChannel,
        result: oneshot::Sender<ExecutionResult<()>>,
    ) -> ActorAction {
        match self.state.get_worker(worker_id).map(|x| x.state.kind()) {
            Some(WorkerStateKind::Pending) => {}
            Some(_) => {
                let _ = result.send(Err(ExecutionError::InvalidArgument(format!(
                    "worker {worker_id} has already registered"
                ))));
                return ActorAction::Continue;
            }
            None => {
                let _ = result.send(Err(ExecutionError::InvalidArgument(format!(
                    "unknown worker: {worker_id}"
                ))));
                return ActorAction::Continue;
            }
        }
        let now = Instant::now();
        let (host, port, client) = match channel {
            WorkerChannel::Local(handle) => {
                info!("worker {worker_id} is available in process");
                ("localhost".to_string(), 0, WorkerClient::Local(handle))
            }
            WorkerChannel::Remote { host, port } => {
                info!("worker {worker_id} is available at {host}:{port}");
                let client = WorkerClient::remote(ClientOptions {
                    enable_tls: self.options().enable_tls,
                    host: host.clone(),
                    port,
                });
                (host, port, client)
            }
        };
        self.state.update_worker(
            worker_id,
            WorkerState::Running {
                host,
                port,
                client,
                active_task: None,
                heartbeat_at: now,
            },
            None,
        );
        let _ = result.send(Ok(()));
        ctx.send_with_delay(
            PoolEvent::ProbeLostWorker {
                worker_id,
                instant: now,
            },
            self.options().worker_heartbeat_timeout(),
        );
        self.schedule_tasks(ctx);
        ActorAction::Continue
    }

    pub(super) fn handle_worker_heartbeat(
        &mut self,
        ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
    ) -> ActorAction {
        match self.state.record_worker_heartbeat(worker_id) {
            Some(instant) => {
                ctx.send_with_delay(
                    PoolEvent::ProbeLostWorker { worker_id, instant },
                    self.options().worker_heartbeat_timeout(),
                );
                ActorAction::Continue
            }
            None => ActorAction::warn(format!(
                "received a heartbeat from worker {worker_id} which is not running"
            )),
        }
    }

    pub(super) fn handle_probe_pending_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
    ) -> ActorAction {
        let pending = matches!(
            self.state.get_worker(worker_id).map(|x| x.state.kind()),
            Some(WorkerStateKind::Pending)
        );
        if !pending {
            return ActorAction::Continue;
        }
        warn!("worker {worker_id} did not register within the launch timeout");
        self.state.update_worker(
            worker_id,
            WorkerState::Failed,
            Some("launch timeout".to_string()),
        );
        let manager = Arc::clone(&self.options().worker_manager);
        ctx.spawn(async move {
            if let Err(e) = manager.stop_worker(worker_id).await {
                debug!("failed to stop worker {worker_id}: {e}");
            }
        });
        self.check_progress();
        ActorAction::Continue
    }

    /// Declares the worker lost if no heartbeat has arrived since the probe
    /// was scheduled. Its in-flight task is resettled, typically by
    /// rescheduling it onto another worker.
    pub(super) fn handle_probe_lost_worker(
        &mut self,
        ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
        instant: Instant,
    ) -> ActorAction {
        let lost = match self.state.get_worker(worker_id).map(|x| &x.state) {
            Some(WorkerState::Running { heartbeat_at, .. }) => *heartbeat_at <= instant,
            _ => false,
        };
        if !lost {
            return ActorAction::Continue;
        }
        warn!("worker {worker_id} is lost due to missed heartbeats");
        let active = self.state.find_active_task_for_worker(worker_id);
        self.state.update_worker(
            worker_id,
            WorkerState::Failed,
            Some("heartbeat timeout".to_string()),
        );
        let manager = Arc::clone(&self.options().worker_manager);
        ctx.spawn(async move {
            if let Err(e) = manager.stop_worker(worker_id).await {
                debug!("failed to stop worker {worker_id}: {e}");
            }
        });
        if let Some((uid, attempt)) = active {
            if self.state.detach_task(&uid, attempt).is_some() {
                self.settle_task(
                    &uid,
                    TaskOutcome::Error {
                        message: format!("worker {worker_id} was lost while running the task"),
                    },
                    true,
                );
            }
        }
        self.check_progress();
        self.schedule_tasks(ctx);
        ActorAction::Continue
    }

    pub(super) fn handle_update_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        worker_id: WorkerId,
        task_uid: String,
        attempt: usize,
        status: TaskStatus,
        value: Option<Value>,
        error: Option<TaskFailure>,
    ) -> ActorAction {
        debug!("task {task_uid} attempt {attempt} reported {status} by worker {worker_id}");
        if matches!(status, TaskStatus::Running) {
            if !self.state.run_task(&task_uid, attempt, worker_id) {
                // The attempt has been superseded; tell the worker to
                // drop it so that it does not occupy the worker forever.
                if let Some(WorkerState::Running { client, .. }) =
                    self.state.get_worker(worker_id).map(|x| &x.state)
                {
                    let client = client.clone();
                    let uid = task_uid.clone();
                    ctx.spawn(async move {
                        let _ = client.stop_task(uid, attempt).await;
                    });
                }
                return ActorAction::warn(format!(
                    "stale running update for task {task_uid} attempt {attempt}"
                ));
            }
            return ActorAction::Continue;
        }
        let Some(owner) = self.state.detach_task(&task_uid, attempt) else {
            return ActorAction::warn(format!(
                "stale terminal update for task {task_uid} attempt {attempt}"
            ));
        };
        if owner != worker_id {
            warn!("task {task_uid} was assigned to worker {owner} but reported by {worker_id}");
        }
        match status {
            TaskStatus::Passed => {
                self.settle_task(
                    &task_uid,
                    TaskOutcome::Passed {
                        value: value.unwrap_or(Value::Null),
                    },
                    false,
                );
            }
            TaskStatus::Failed => {
                let error = error.unwrap_or_else(|| {
                    TaskFailure::new("failure", "the worker reported no error details")
                });
                self.settle_task(&task_uid, TaskOutcome::Failed { error }, false);
            }
            TaskStatus::Canceled => {
                // Cancellation comes from a deliberate stop and is never
                // retried.
                info!("task {task_uid} was canceled on worker {worker_id}");
                self.state.finish_task(
                    &task_uid,
                    TaskOutcome::Error {
                        message: "task canceled".to_string(),
                    },
                );
            }
            TaskStatus::Running => {}
        }
        self.schedule_tasks(ctx);
        ActorAction::Continue
    }

    /// Decides whether a completed or interrupted task attempt is rescheduled
    /// or finalized. The reschedule check (or the default retry-on-failure
    /// policy) proposes, and the retry budget disposes. The check only applies
    /// to worker-reported completions; an interrupted attempt is always
    /// proposed for rescheduling.
    fn settle_task(&mut self, uid: &str, outcome: TaskOutcome, interrupted: bool) {
        let Some(task) = self.state.get_task(uid) else {
            warn!("task {uid} not found");
            return;
        };
        let assign_count = task.assign_count;
        let rerun = task.spec.rerun;
        let limit = self.options().task_retries_limit;
        let max_assignments = if rerun > 0 { limit.min(1 + rerun) } else { limit };
        let budget_left = assign_count < max_assignments;
        let default_retry = !outcome.is_passed();
        let wants_retry = if interrupted {
            true
        } else {
            match &self.reschedule_check {
                Some(check) => {
                    let status = self.state.status(self.failed);
                    let result = TaskResult {
                        uid: uid.to_string(),
                        outcome: outcome.clone(),
                        assign_count,
                    };
                    check(&status, &result)
                }
                None => default_retry,
            }
        };
        if wants_retry && budget_left {
            info!("rescheduling task {uid} after attempt {assign_count}");
            self.state.reschedule_task(uid);
        } else if wants_retry && !outcome.is_passed() {
            let detail = match &outcome {
                TaskOutcome::Failed { error } => error.to_string(),
                TaskOutcome::Error { message } => message.clone(),
                TaskOutcome::Passed { .. } => String::new(),
            };
            warn!("task {uid} exhausted its retry budget after {assign_count} attempts");
            self.state.finish_task(
                uid,
                TaskOutcome::Error {
                    message: format!(
                        "retry budget exhausted after {assign_count} attempts: {detail}"
                    ),
                },
            );
        } else {
            self.state.finish_task(uid, outcome);
        }
    }

    /// Hands pending tasks to idle workers in FIFO order.
    pub(super) fn schedule_tasks(&mut self, ctx: &mut ActorContext<Self>) {
        while self.state.has_pending_tasks() {
            let Some(worker_id) = self.state.find_idle_worker() else {
                break;
            };
            let uid = match self.state.assign_next_task(worker_id) {
                Ok(Some(uid)) => uid,
                Ok(None) => break,
                Err(e) => {
                    warn!("failed to assign a task to worker {worker_id}: {e}");
                    break;
                }
            };
            let Some(task) = self.state.get_task(&uid) else {
                break;
            };
            let attempt = task.assign_count;
            let target = task.spec.target.clone();
            let input = task.spec.input.clone();
            let client = match self.state.get_worker(worker_id).map(|x| &x.state) {
                Some(WorkerState::Running { client, .. }) => client.clone(),
                _ => break,
            };
            info!("assigning task {uid} to worker {worker_id} (attempt {attempt})");
            ctx.spawn(async move {
                // A dispatch failure leaves the task attached to the worker;
                // the heartbeat probe recovers it when the worker is lost.
                if let Err(e) = client.run_task(uid.clone(), attempt, target, input).await {
                    error!("failed to dispatch task {uid} to worker {worker_id}: {e}");
                }
            });
        }
    }

    /// Fails the pool when no worker is left to run the unfinished tasks.
    /// Once the pool has failed, tasks submitted afterwards are finalized
    /// here as well.
    fn check_progress(&mut self) {
        if !self.started {
            return;
        }
        if !self.failed {
            if self.state.count_active_workers() > 0 || self.state.count_unfinished_tasks() == 0 {
                return;
            }
            error!("all workers are gone; failing the remaining tasks");
            self.failed = true;
        }
        for uid in self.state.list_unfinished_tasks() {
            if let Some(task) = self.state.get_task(&uid) {
                let attempt = task.assign_count;
                let _ = self.state.detach_task(&uid, attempt);
            }
            self.state.finish_task(
                &uid,
                TaskOutcome::Error {
                    message: "no workers available".to_string(),
                },
            );
        }
    }
}
