use std::collections::HashMap;
use std::mem;

use drover_server::actor::{Actor, ActorAction, ActorContext};
use log::debug;
use tokio::sync::oneshot;

use crate::id::TaskAttempt;
use crate::pool::PoolClient;
use crate::rpc::ServerMonitor;
use crate::worker::event::WorkerEvent;
use crate::worker::options::WorkerOptions;

pub struct WorkerActor {
    options: WorkerOptions,
    pub(super) server: ServerMonitor,
    /// Cancellation signals for in-flight task monitors.
    /// Dropping a signal cancels the monitor without a status report.
    pub(super) task_signals: HashMap<TaskAttempt, oneshot::Sender<()>>,
}

#[tonic::async_trait]
impl Actor for WorkerActor {
    type Message = WorkerEvent;
    type Options = WorkerOptions;

    fn new(options: WorkerOptions) -> Self {
        Self {
            options,
            server: ServerMonitor::new(),
            task_signals: HashMap::new(),
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        match &self.options.pool {
            PoolClient::Local(_) => {
                // In-process workers have no server; they are reachable
                // through their own mailbox.
                self.register_local(ctx);
            }
            PoolClient::Remote(_) => {
                let addr = (
                    self.options().worker_listen_host.clone(),
                    self.options().worker_listen_port,
                );
                let server = mem::take(&mut self.server);
                self.server = server.start(Self::serve(ctx.handle().clone(), addr)).await;
            }
        }
        ctx.send_with_delay(
            WorkerEvent::ReportHeartbeat,
            self.options().worker_heartbeat_interval,
        );
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: Self::Message) -> ActorAction {
        match message {
            WorkerEvent::ServerReady { port, signal } => {
                self.handle_server_ready(ctx, port, signal)
            }
            WorkerEvent::RunTask {
                task_uid,
                attempt,
                target,
                input,
            } => self.handle_run_task(ctx, task_uid, attempt, target, input),
            WorkerEvent::StopTask { task_uid, attempt } => {
                self.handle_stop_task(ctx, task_uid, attempt)
            }
            WorkerEvent::ReportHeartbeat => self.handle_report_heartbeat(ctx),
            WorkerEvent::ReportTaskStatus {
                task_uid,
                attempt,
                status,
                value,
                error,
            } => self.handle_report_task_status(ctx, task_uid, attempt, status, value, error),
            WorkerEvent::Shutdown => ActorAction::Stop,
        }
    }

    async fn stop(self, _ctx: &mut ActorContext<Self>) {
        self.server.stop().await;
        debug!("worker {} has stopped", self.options.worker_id);
    }
}

impl WorkerActor {
    pub(super) fn options(&self) -> &WorkerOptions {
        &self.options
    }
}
