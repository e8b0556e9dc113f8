use std::collections::HashMap;
use std::path::PathBuf;

use log::warn;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::error::ExecutionResult;
use crate::id::WorkerId;
use crate::worker::options::env;
use crate::worker_manager::{WorkerLaunchOptions, WorkerManager, WorkerTransportMode};

pub struct ProcessWorkerManagerOptions {
    /// The worker program to run, typically a binary that calls
    /// `run_worker` with the task handler registry.
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// A worker manager that launches workers as child processes,
/// configured through environment variables.
pub struct ProcessWorkerManager {
    options: ProcessWorkerManagerOptions,
    children: Mutex<HashMap<WorkerId, Child>>,
}

impl ProcessWorkerManager {
    pub fn new(options: ProcessWorkerManagerOptions) -> Self {
        Self {
            options,
            children: Mutex::new(HashMap::new()),
        }
    }
}

#[tonic::async_trait]
impl WorkerManager for ProcessWorkerManager {
    fn mode(&self) -> WorkerTransportMode {
        WorkerTransportMode::External
    }

    async fn launch_worker(
        &self,
        id: WorkerId,
        options: WorkerLaunchOptions,
    ) -> ExecutionResult<()> {
        let child = Command::new(&self.options.program)
            .args(&self.options.args)
            .env(env::WORKER_ID, u64::from(id).to_string())
            .env(env::POOL_EXTERNAL_HOST, &options.pool_external_host)
            .env(
                env::POOL_EXTERNAL_PORT,
                options.pool_external_port.to_string(),
            )
            .env(
                env::WORKER_HEARTBEAT_INTERVAL_MS,
                options.worker_heartbeat_interval.as_millis().to_string(),
            )
            .env(env::ENABLE_TLS, options.enable_tls.to_string())
            .kill_on_drop(true)
            .spawn()?;
        self.children.lock().await.insert(id, child);
        Ok(())
    }

    async fn stop_worker(&self, id: WorkerId) -> ExecutionResult<()> {
        let child = self.children.lock().await.remove(&id);
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                warn!("failed to kill worker {id} process: {e}");
            }
        }
        Ok(())
    }

    async fn stop(&self) -> ExecutionResult<()> {
        let children = {
            let mut children = self.children.lock().await;
            children.drain().collect::<Vec<_>>()
        };
        for (id, mut child) in children {
            if let Err(e) = child.kill().await {
                warn!("failed to kill worker {id} process: {e}");
            }
        }
        Ok(())
    }
}
