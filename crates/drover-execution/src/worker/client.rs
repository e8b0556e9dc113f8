use drover_server::actor::ActorHandle;
use tonic::transport::Channel;

use crate::error::ExecutionResult;
use crate::rpc::{ClientHandle, ClientOptions};
use crate::task::{TaskInput, TaskTarget};
use crate::worker::gen;
use crate::worker::{WorkerActor, WorkerEvent, WorkerServiceClient};

/// The transport from the pool coordinator to a worker.
#[derive(Clone)]
pub(crate) enum WorkerClient {
    Local(ActorHandle<WorkerActor>),
    Remote(ClientHandle<WorkerServiceClient<Channel>>),
}

impl WorkerClient {
    pub fn remote(options: ClientOptions) -> Self {
        Self::Remote(ClientHandle::new(options))
    }

    #[cfg(test)]
    pub fn null() -> Self {
        Self::remote(ClientOptions {
            enable_tls: false,
            host: "127.0.0.1".to_string(),
            port: 1,
        })
    }

    pub async fn run_task(
        &self,
        task_uid: String,
        attempt: usize,
        target: TaskTarget,
        input: TaskInput,
    ) -> ExecutionResult<()> {
        match self {
            Self::Local(handle) => {
                handle
                    .send(WorkerEvent::RunTask {
                        task_uid,
                        attempt,
                        target,
                        input,
                    })
                    .await?;
                Ok(())
            }
            Self::Remote(client) => {
                let request = gen::RunTaskRequest {
                    task_uid,
                    attempt: attempt as u64,
                    module: target.module,
                    symbol: target.symbol,
                    input: serde_json::to_string(&input)?,
                };
                client.get().await?.run_task(request).await?;
                Ok(())
            }
        }
    }

    pub async fn stop_task(&self, task_uid: String, attempt: usize) -> ExecutionResult<()> {
        match self {
            Self::Local(handle) => {
                handle
                    .send(WorkerEvent::StopTask { task_uid, attempt })
                    .await?;
                Ok(())
            }
            Self::Remote(client) => {
                let request = gen::StopTaskRequest {
                    task_uid,
                    attempt: attempt as u64,
                };
                client.get().await?.stop_task(request).await?;
                Ok(())
            }
        }
    }

    pub async fn stop_worker(&self) -> ExecutionResult<()> {
        match self {
            Self::Local(handle) => {
                handle.send(WorkerEvent::Shutdown).await?;
                Ok(())
            }
            Self::Remote(client) => {
                let request = gen::StopWorkerRequest {};
                client.get().await?.stop_worker(request).await?;
                Ok(())
            }
        }
    }
}
