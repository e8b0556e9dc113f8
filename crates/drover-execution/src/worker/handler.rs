use std::mem;

use drover_server::actor::{ActorAction, ActorContext};
use log::{error, info, warn};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::id::TaskAttempt;
use crate::pool::{TaskStatus, WorkerChannel};
use crate::task::{TaskFailure, TaskInput, TaskTarget};
use crate::worker::core::WorkerActor;
use crate::worker::WorkerEvent;

impl WorkerActor {
    pub(super) fn handle_server_ready(
        &mut self,
        ctx: &mut ActorContext<Self>,
        port: u16,
        signal: oneshot::Sender<()>,
    ) -> ActorAction {
        let worker_id = self.options().worker_id;
        info!("worker {worker_id} server is ready on port {port}");
        let server = mem::take(&mut self.server);
        self.server = match server.ready(signal, port) {
            Ok(x) => x,
            Err(e) => return ActorAction::fail(e),
        };
        let host = self.options().worker_external_host.clone();
        let port = self.options().worker_external_port.unwrap_or(port);
        self.register(ctx, WorkerChannel::Remote { host, port });
        ActorAction::Continue
    }

    /// Registers an in-process worker, which is reachable through its own
    /// mailbox rather than a server address.
    pub(super) fn register_local(&mut self, ctx: &mut ActorContext<Self>) {
        let channel = WorkerChannel::Local(ctx.handle().clone());
        self.register(ctx, channel);
    }

    fn register(&mut self, ctx: &mut ActorContext<Self>, channel: WorkerChannel) {
        let worker_id = self.options().worker_id;
        let pool = self.options().pool.clone();
        let retry = self.options().rpc_retry_strategy.clone();
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let out = match channel {
                // Registration through the actor mailbox cannot be retried
                // since the channel is consumed, but it only fails when the
                // pool itself is gone.
                WorkerChannel::Local(worker) => {
                    pool.register_worker(worker_id, WorkerChannel::Local(worker))
                        .await
                }
                WorkerChannel::Remote { host, port } => {
                    retry
                        .run(|| {
                            let pool = pool.clone();
                            let host = host.clone();
                            async move {
                                pool.register_worker(
                                    worker_id,
                                    WorkerChannel::Remote { host, port },
                                )
                                .await
                            }
                        })
                        .await
                }
            };
            if let Err(e) = out {
                error!("failed to register worker {worker_id}: {e}");
                let _ = handle.send(WorkerEvent::Shutdown).await;
            }
        });
    }

    pub(super) fn handle_run_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        task_uid: String,
        attempt: usize,
        target: TaskTarget,
        input: TaskInput,
    ) -> ActorAction {
        let handler = match self.options().registry.resolve(&target) {
            Ok(x) => x,
            Err(e) => {
                let failure = TaskFailure::new("unresolved-target", e.to_string());
                self.report_task_status(
                    ctx,
                    task_uid,
                    attempt,
                    TaskStatus::Failed,
                    None,
                    Some(failure),
                );
                return ActorAction::Continue;
            }
        };
        self.report_task_status(
            ctx,
            task_uid.clone(),
            attempt,
            TaskStatus::Running,
            None,
            None,
        );
        let (tx, rx) = oneshot::channel();
        self.task_signals.insert(
            TaskAttempt {
                task_uid: task_uid.clone(),
                attempt,
            },
            tx,
        );
        let handle = ctx.handle().clone();
        ctx.spawn(async move {
            let work = tokio::task::spawn_blocking(move || handler.run(input));
            let (status, value, error) = tokio::select! {
                // Fires on an explicit stop signal or when the worker actor
                // drops the signal during shutdown.
                _ = rx => (TaskStatus::Canceled, None, None),
                result = work => match result {
                    Ok(Ok(value)) => (TaskStatus::Passed, Some(value.into_wire()), None),
                    Ok(Err(failure)) => (TaskStatus::Failed, None, Some(failure)),
                    Err(e) => {
                        let failure = if e.is_panic() {
                            let panic = e.into_panic();
                            let message = panic
                                .downcast_ref::<&str>()
                                .map(|x| x.to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "task panicked".to_string());
                            TaskFailure::new("panic", message)
                        } else {
                            TaskFailure::new("execution", e.to_string())
                        };
                        (TaskStatus::Failed, None, Some(failure))
                    }
                },
            };
            let _ = handle
                .send(WorkerEvent::ReportTaskStatus {
                    task_uid,
                    attempt,
                    status,
                    value,
                    error,
                })
                .await;
        });
        ActorAction::Continue
    }

    pub(super) fn handle_stop_task(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        task_uid: String,
        attempt: usize,
    ) -> ActorAction {
        let key = TaskAttempt { task_uid, attempt };
        match self.task_signals.remove(&key) {
            Some(signal) => {
                let _ = signal.send(());
                ActorAction::Continue
            }
            None => ActorAction::warn(format!(
                "no task to stop: {} attempt {}",
                key.task_uid, key.attempt
            )),
        }
    }

    pub(super) fn handle_report_heartbeat(&mut self, ctx: &mut ActorContext<Self>) -> ActorAction {
        let worker_id = self.options().worker_id;
        let pool = self.options().pool.clone();
        ctx.spawn(async move {
            if let Err(e) = pool.report_heartbeat(worker_id).await {
                warn!("failed to report worker {worker_id} heartbeat: {e}");
            }
        });
        ctx.send_with_delay(
            WorkerEvent::ReportHeartbeat,
            self.options().worker_heartbeat_interval,
        );
        ActorAction::Continue
    }

    pub(super) fn handle_report_task_status(
        &mut self,
        ctx: &mut ActorContext<Self>,
        task_uid: String,
        attempt: usize,
        status: TaskStatus,
        value: Option<Value>,
        error: Option<TaskFailure>,
    ) -> ActorAction {
        self.task_signals.remove(&TaskAttempt {
            task_uid: task_uid.clone(),
            attempt,
        });
        self.report_task_status(ctx, task_uid, attempt, status, value, error);
        ActorAction::Continue
    }

    fn report_task_status(
        &mut self,
        ctx: &mut ActorContext<Self>,
        task_uid: String,
        attempt: usize,
        status: TaskStatus,
        value: Option<Value>,
        error: Option<TaskFailure>,
    ) {
        let worker_id = self.options().worker_id;
        let pool = self.options().pool.clone();
        ctx.spawn(async move {
            if let Err(e) = pool
                .report_task_status(worker_id, task_uid, attempt, status, value, error)
                .await
            {
                error!("failed to report task status: {e}");
            }
        });
    }
}
