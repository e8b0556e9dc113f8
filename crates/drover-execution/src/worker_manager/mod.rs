mod in_process;
mod options;
mod process;
mod remote;

pub use in_process::InProcessWorkerManager;
pub use options::WorkerLaunchOptions;
pub use process::{ProcessWorkerManager, ProcessWorkerManagerOptions};
pub use remote::{RemoteHost, RemoteWorkerManager, RemoteWorkerManagerOptions};

use crate::error::ExecutionResult;
use crate::id::WorkerId;

/// How workers launched by a manager communicate with the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerTransportMode {
    /// Workers are actors in the pool process, reached through mailboxes.
    InProcess,
    /// Workers are separate processes, reached over gRPC.
    External,
}

#[tonic::async_trait]
pub trait WorkerManager: Send + Sync + 'static {
    fn mode(&self) -> WorkerTransportMode;

    /// Launch a worker.
    async fn launch_worker(
        &self,
        id: WorkerId,
        options: WorkerLaunchOptions,
    ) -> ExecutionResult<()>;

    /// Stop a single worker abruptly, on a best-effort basis.
    async fn stop_worker(&self, id: WorkerId) -> ExecutionResult<()>;

    /// Stop all workers on a best-effort basis.
    /// The pool has attempted to send shutdown events to all workers
    /// at this point, but it is unknown whether the events have been
    /// received. The worker manager is supposed to wait for the
    /// termination of all workers before returning from this method.
    async fn stop(&self) -> ExecutionResult<()>;
}
