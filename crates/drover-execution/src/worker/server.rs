use drover_server::actor::ActorHandle;
use drover_server::ServerBuilder;
use log::debug;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tonic::codec::CompressionEncoding;
use tonic::{Request, Response, Status};

use crate::error::{ExecutionError, ExecutionResult};
use crate::task::{TaskInput, TaskTarget};
use crate::worker::core::WorkerActor;
use crate::worker::gen;
use crate::worker::gen::worker_service_server::{WorkerService, WorkerServiceServer};
use crate::worker::WorkerEvent;

pub struct WorkerServer {
    handle: ActorHandle<WorkerActor>,
}

impl WorkerServer {
    pub fn new(handle: ActorHandle<WorkerActor>) -> Self {
        Self { handle }
    }
}

#[tonic::async_trait]
impl WorkerService for WorkerServer {
    async fn run_task(
        &self,
        request: Request<gen::RunTaskRequest>,
    ) -> Result<Response<gen::RunTaskResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::RunTaskRequest {
            task_uid,
            attempt,
            module,
            symbol,
            input,
        } = request;
        let input: TaskInput = serde_json::from_str(&input).map_err(ExecutionError::from)?;
        let event = WorkerEvent::RunTask {
            task_uid,
            attempt: attempt as usize,
            target: TaskTarget::new(module, symbol),
            input,
        };
        self.handle
            .send(event)
            .await
            .map_err(ExecutionError::from)?;
        let response = gen::RunTaskResponse {};
        debug!("{response:?}");
        Ok(Response::new(response))
    }

    async fn stop_task(
        &self,
        request: Request<gen::StopTaskRequest>,
    ) -> Result<Response<gen::StopTaskResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::StopTaskRequest { task_uid, attempt } = request;
        let event = WorkerEvent::StopTask {
            task_uid,
            attempt: attempt as usize,
        };
        self.handle
            .send(event)
            .await
            .map_err(ExecutionError::from)?;
        let response = gen::StopTaskResponse {};
        debug!("{response:?}");
        Ok(Response::new(response))
    }

    async fn stop_worker(
        &self,
        request: Request<gen::StopWorkerRequest>,
    ) -> Result<Response<gen::StopWorkerResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::StopWorkerRequest {} = request;
        self.handle
            .send(WorkerEvent::Shutdown)
            .await
            .map_err(ExecutionError::from)?;
        let response = gen::StopWorkerResponse {};
        debug!("{response:?}");
        Ok(Response::new(response))
    }
}

impl WorkerActor {
    pub(super) async fn serve(
        handle: ActorHandle<WorkerActor>,
        addr: (String, u16),
    ) -> ExecutionResult<()> {
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        let (tx, rx) = oneshot::channel();
        handle
            .send(WorkerEvent::ServerReady { port, signal: tx })
            .await?;

        let server = WorkerServer::new(handle);
        let service = WorkerServiceServer::new(server)
            .accept_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Zstd)
            .send_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Zstd);

        ServerBuilder::new("drover_worker", Default::default())
            .add_service(service, Some(gen::FILE_DESCRIPTOR_SET))
            .await
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
            .map_err(|e| ExecutionError::InternalError(e.to_string()))
    }
}
