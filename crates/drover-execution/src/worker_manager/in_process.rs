use std::collections::HashMap;
use std::sync::Arc;

use drover_server::actor::{ActorHandle, ActorSystem};
use tokio::sync::Mutex;

use crate::error::ExecutionResult;
use crate::id::WorkerId;
use crate::task::TaskHandlerRegistry;
use crate::worker::{WorkerActor, WorkerEvent, WorkerOptions};
use crate::worker_manager::{WorkerLaunchOptions, WorkerManager, WorkerTransportMode};

struct InProcessWorkerManagerState {
    system: ActorSystem,
    workers: HashMap<WorkerId, ActorHandle<WorkerActor>>,
}

impl InProcessWorkerManagerState {
    fn new() -> Self {
        Self {
            system: ActorSystem::new(),
            workers: HashMap::new(),
        }
    }
}

/// A worker manager that hosts worker actors in the pool process.
pub struct InProcessWorkerManager {
    registry: Arc<TaskHandlerRegistry>,
    state: Mutex<InProcessWorkerManagerState>,
}

impl InProcessWorkerManager {
    pub fn new(registry: Arc<TaskHandlerRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(InProcessWorkerManagerState::new()),
        }
    }
}

#[tonic::async_trait]
impl WorkerManager for InProcessWorkerManager {
    fn mode(&self) -> WorkerTransportMode {
        WorkerTransportMode::InProcess
    }

    async fn launch_worker(
        &self,
        id: WorkerId,
        options: WorkerLaunchOptions,
    ) -> ExecutionResult<()> {
        let options = WorkerOptions::in_process(id, &options, Arc::clone(&self.registry));
        let mut state = self.state.lock().await;
        let handle = state.system.spawn::<WorkerActor>(options);
        state.workers.insert(id, handle);
        Ok(())
    }

    async fn stop_worker(&self, id: WorkerId) -> ExecutionResult<()> {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.workers.remove(&id) {
            let _ = handle.send(WorkerEvent::Shutdown).await;
        }
        Ok(())
    }

    async fn stop(&self) -> ExecutionResult<()> {
        let mut state = self.state.lock().await;
        let handles = state
            .workers
            .drain()
            .map(|(_, handle)| handle)
            .collect::<Vec<_>>();
        for handle in handles {
            let _ = handle.send(WorkerEvent::Shutdown).await;
        }
        state.system.join().await;
        Ok(())
    }
}
