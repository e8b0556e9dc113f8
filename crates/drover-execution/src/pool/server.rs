use drover_server::actor::ActorHandle;
use drover_server::ServerBuilder;
use log::debug;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tonic::codec::CompressionEncoding;
use tonic::{Request, Response, Status};

use crate::error::{ExecutionError, ExecutionResult};
use crate::pool::core::PoolActor;
use crate::pool::gen;
use crate::pool::gen::pool_service_server::{PoolService, PoolServiceServer};
use crate::pool::{PoolEvent, TaskStatus, WorkerChannel};

pub struct PoolServer {
    handle: ActorHandle<PoolActor>,
}

impl PoolServer {
    pub fn new(handle: ActorHandle<PoolActor>) -> Self {
        Self { handle }
    }
}

#[tonic::async_trait]
impl PoolService for PoolServer {
    async fn register_worker(
        &self,
        request: Request<gen::RegisterWorkerRequest>,
    ) -> Result<Response<gen::RegisterWorkerResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::RegisterWorkerRequest {
            worker_id,
            host,
            port,
        } = request;
        let port = u16::try_from(port)
            .map_err(|_| ExecutionError::InvalidArgument(format!("invalid port: {port}")))?;
        let (tx, rx) = oneshot::channel();
        let event = PoolEvent::RegisterWorker {
            worker_id: worker_id.into(),
            channel: WorkerChannel::Remote { host, port },
            result: tx,
        };
        self.handle
            .send(event)
            .await
            .map_err(ExecutionError::from)?;
        rx.await.map_err(ExecutionError::from)??;
        let response = gen::RegisterWorkerResponse {};
        debug!("{response:?}");
        Ok(Response::new(response))
    }

    async fn report_worker_heartbeat(
        &self,
        request: Request<gen::ReportWorkerHeartbeatRequest>,
    ) -> Result<Response<gen::ReportWorkerHeartbeatResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::ReportWorkerHeartbeatRequest { worker_id } = request;
        let event = PoolEvent::WorkerHeartbeat {
            worker_id: worker_id.into(),
        };
        self.handle
            .send(event)
            .await
            .map_err(ExecutionError::from)?;
        let response = gen::ReportWorkerHeartbeatResponse {};
        debug!("{response:?}");
        Ok(Response::new(response))
    }

    async fn report_task_status(
        &self,
        request: Request<gen::ReportTaskStatusRequest>,
    ) -> Result<Response<gen::ReportTaskStatusResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let gen::ReportTaskStatusRequest {
            worker_id,
            task_uid,
            attempt,
            status,
            value,
            error,
        } = request;
        let status = gen::TaskStatus::try_from(status).map_err(ExecutionError::from)?;
        let status = TaskStatus::try_from(status)?;
        let value = value
            .map(|x| serde_json::from_str(&x))
            .transpose()
            .map_err(ExecutionError::from)?;
        let event = PoolEvent::UpdateTask {
            worker_id: worker_id.into(),
            task_uid,
            attempt: attempt as usize,
            status,
            value,
            error: error.map(|x| x.into()),
        };
        self.handle
            .send(event)
            .await
            .map_err(ExecutionError::from)?;
        let response = gen::ReportTaskStatusResponse {};
        debug!("{response:?}");
        Ok(Response::new(response))
    }
}

impl PoolActor {
    pub(super) async fn serve(
        handle: ActorHandle<PoolActor>,
        addr: (String, u16),
    ) -> ExecutionResult<()> {
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        let (tx, rx) = oneshot::channel();
        handle
            .send(PoolEvent::ServerReady { port, signal: tx })
            .await?;

        let server = PoolServer::new(handle);
        let service = PoolServiceServer::new(server)
            .accept_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Zstd)
            .send_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Zstd);

        ServerBuilder::new("drover_pool", Default::default())
            .add_service(service, Some(gen::FILE_DESCRIPTOR_SET))
            .await
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
            .map_err(|e| ExecutionError::InternalError(e.to_string()))
    }
}
