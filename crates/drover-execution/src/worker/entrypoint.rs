use std::sync::Arc;

use drover_server::actor::ActorSystem;

use crate::error::ExecutionResult;
use crate::task::TaskHandlerRegistry;
use crate::worker::{WorkerActor, WorkerOptions};

/// Runs a worker process until it is stopped by the pool.
/// The worker options are read from the `DROVER__*` environment variables
/// set by the worker manager that launched this process.
pub async fn run_worker(registry: Arc<TaskHandlerRegistry>) -> ExecutionResult<()> {
    let options = WorkerOptions::try_from_env(registry)?;
    let mut system = ActorSystem::new();
    let _handle = system.spawn::<WorkerActor>(options);
    system.join().await;
    Ok(())
}
