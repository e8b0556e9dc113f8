use drover_server::actor::ActorHandle;
use serde_json::Value;
use tokio::sync::oneshot;
use tonic::transport::Channel;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::WorkerId;
use crate::pool::gen;
use crate::pool::{PoolActor, PoolEvent, PoolServiceClient, TaskStatus};
use crate::rpc::{ClientHandle, ClientOptions};
use crate::task::TaskFailure;
use crate::worker::WorkerActor;

/// The transport over which a registering worker can be reached.
pub(crate) enum WorkerChannel {
    /// The mailbox of a worker actor running in the pool process.
    Local(ActorHandle<WorkerActor>),
    /// The address of a worker gRPC server.
    Remote { host: String, port: u16 },
}

/// The transport from a worker back to the pool coordinator.
/// In-process workers send events to the pool actor directly, while
/// external workers go through the pool gRPC service.
#[derive(Clone)]
pub enum PoolClient {
    Local(ActorHandle<PoolActor>),
    Remote(ClientHandle<PoolServiceClient<Channel>>),
}

impl PoolClient {
    pub(crate) fn remote(options: ClientOptions) -> Self {
        Self::Remote(ClientHandle::new(options))
    }

    pub(crate) async fn register_worker(
        &self,
        worker_id: WorkerId,
        channel: WorkerChannel,
    ) -> ExecutionResult<()> {
        match (self, channel) {
            (Self::Local(handle), channel) => {
                let (tx, rx) = oneshot::channel();
                handle
                    .send(PoolEvent::RegisterWorker {
                        worker_id,
                        channel,
                        result: tx,
                    })
                    .await?;
                rx.await?
            }
            (Self::Remote(client), WorkerChannel::Remote { host, port }) => {
                let request = gen::RegisterWorkerRequest {
                    worker_id: worker_id.into(),
                    host,
                    port: port as u32,
                };
                client.get().await?.register_worker(request).await?;
                Ok(())
            }
            (Self::Remote(_), WorkerChannel::Local(_)) => Err(ExecutionError::InternalError(
                "an in-process worker cannot register over the network".to_string(),
            )),
        }
    }

    pub(crate) async fn report_heartbeat(&self, worker_id: WorkerId) -> ExecutionResult<()> {
        match self {
            Self::Local(handle) => {
                handle.send(PoolEvent::WorkerHeartbeat { worker_id }).await?;
                Ok(())
            }
            Self::Remote(client) => {
                let request = gen::ReportWorkerHeartbeatRequest {
                    worker_id: worker_id.into(),
                };
                client.get().await?.report_worker_heartbeat(request).await?;
                Ok(())
            }
        }
    }

    pub(crate) async fn report_task_status(
        &self,
        worker_id: WorkerId,
        task_uid: String,
        attempt: usize,
        status: TaskStatus,
        value: Option<Value>,
        error: Option<TaskFailure>,
    ) -> ExecutionResult<()> {
        match self {
            Self::Local(handle) => {
                handle
                    .send(PoolEvent::UpdateTask {
                        worker_id,
                        task_uid,
                        attempt,
                        status,
                        value,
                        error,
                    })
                    .await?;
                Ok(())
            }
            Self::Remote(client) => {
                let value = value.map(|x| x.to_string());
                let request = gen::ReportTaskStatusRequest {
                    worker_id: worker_id.into(),
                    task_uid,
                    attempt: attempt as u64,
                    status: gen::TaskStatus::from(status) as i32,
                    value,
                    error: error.map(|x| x.into()),
                };
                client.get().await?.report_task_status(request).await?;
                Ok(())
            }
        }
    }
}

impl From<TaskFailure> for gen::TaskError {
    fn from(value: TaskFailure) -> Self {
        Self {
            kind: value.kind,
            message: value.message,
            trace: value.trace,
        }
    }
}

impl From<gen::TaskError> for TaskFailure {
    fn from(value: gen::TaskError) -> Self {
        Self {
            kind: value.kind,
            message: value.message,
            trace: value.trace,
        }
    }
}
