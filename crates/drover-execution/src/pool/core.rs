use std::mem;
use std::sync::Arc;

use drover_server::actor::{Actor, ActorAction, ActorContext};
use log::{debug, warn};
use tokio::sync::oneshot;

use crate::error::ExecutionResult;
use crate::pool::event::RescheduleCheck;
use crate::pool::state::PoolState;
use crate::pool::{PoolEvent, PoolOptions};
use crate::rpc::ServerMonitor;
use crate::worker_manager::WorkerTransportMode;

pub struct PoolActor {
    options: PoolOptions,
    pub(super) state: PoolState,
    pub(super) server: ServerMonitor,
    pub(super) reschedule_check: Option<RescheduleCheck>,
    /// A start request deferred until the pool server is ready.
    pub(super) pending_start: Option<oneshot::Sender<ExecutionResult<()>>>,
    pub(super) started: bool,
    /// Set when the pool can no longer make progress.
    pub(super) failed: bool,
}

#[tonic::async_trait]
impl Actor for PoolActor {
    type Message = PoolEvent;
    type Options = PoolOptions;

    fn new(options: PoolOptions) -> Self {
        Self {
            options,
            state: PoolState::new(),
            server: ServerMonitor::new(),
            reschedule_check: None,
            pending_start: None,
            started: false,
            failed: false,
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        // In-process pools have no server; workers reach the pool
        // through its mailbox.
        if self.options.worker_manager.mode() == WorkerTransportMode::External {
            let addr = (
                self.options().pool_listen_host.clone(),
                self.options().pool_listen_port,
            );
            let server = mem::take(&mut self.server);
            self.server = server.start(Self::serve(ctx.handle().clone(), addr)).await;
        }
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: Self::Message) -> ActorAction {
        match message {
            PoolEvent::ServerReady { port, signal } => self.handle_server_ready(ctx, port, signal),
            PoolEvent::Start { result } => self.handle_start(ctx, result),
            PoolEvent::AddTask { spec, result } => self.handle_add_task(ctx, spec, result),
            PoolEvent::PollResult { task_uid, result } => {
                self.handle_poll_result(ctx, task_uid, result)
            }
            PoolEvent::SetRescheduleCheck { check } => {
                self.reschedule_check = Some(check);
                ActorAction::Continue
            }
            PoolEvent::RegisterWorker {
                worker_id,
                channel,
                result,
            } => self.handle_register_worker(ctx, worker_id, channel, result),
            PoolEvent::WorkerHeartbeat { worker_id } => {
                self.handle_worker_heartbeat(ctx, worker_id)
            }
            PoolEvent::ProbePendingWorker { worker_id } => {
                self.handle_probe_pending_worker(ctx, worker_id)
            }
            PoolEvent::ProbeLostWorker { worker_id, instant } => {
                self.handle_probe_lost_worker(ctx, worker_id, instant)
            }
            PoolEvent::UpdateTask {
                worker_id,
                task_uid,
                attempt,
                status,
                value,
                error,
            } => self.handle_update_task(ctx, worker_id, task_uid, attempt, status, value, error),
            PoolEvent::ObserveStatus { result } => {
                let _ = result.send(self.state.status(self.failed));
                ActorAction::Continue
            }
            PoolEvent::Shutdown => ActorAction::Stop,
        }
    }

    async fn stop(self, _ctx: &mut ActorContext<Self>) {
        for (worker_id, client) in self.state.list_worker_clients() {
            tokio::spawn(async move {
                if let Err(e) = client.stop_worker().await {
                    debug!("failed to signal worker {worker_id} to stop: {e}");
                }
            });
        }
        let manager = Arc::clone(&self.options.worker_manager);
        let out = tokio::time::timeout(self.options.worker_stop_timeout, manager.stop()).await;
        match out {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("failed to stop workers: {e}"),
            Err(_) => warn!("workers did not stop within the timeout; abandoning them"),
        }
        self.server.stop().await;
        debug!("pool has stopped");
    }
}

impl PoolActor {
    pub(super) fn options(&self) -> &PoolOptions {
        &self.options
    }
}
