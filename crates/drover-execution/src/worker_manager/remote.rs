use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use log::{info, warn};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::WorkerId;
use crate::worker::options::env;
use crate::worker_manager::{WorkerLaunchOptions, WorkerManager, WorkerTransportMode};

#[derive(Debug, Clone)]
pub struct RemoteHost {
    pub host: String,
    /// The number of workers this host should receive before the
    /// round-robin placement moves on.
    pub worker_count: usize,
}

pub struct RemoteWorkerManagerOptions {
    pub hosts: Vec<RemoteHost>,
    /// The worker program path on the remote hosts.
    pub worker_program: String,
    /// Files copied to each remote host before its first worker starts.
    pub push_files: Vec<(PathBuf, String)>,
    /// A command executed on each remote host before its first worker starts.
    pub setup_command: Option<String>,
    pub ssh_program: String,
    pub scp_program: String,
}

impl RemoteWorkerManagerOptions {
    pub fn new(hosts: Vec<RemoteHost>, worker_program: impl Into<String>) -> Self {
        Self {
            hosts,
            worker_program: worker_program.into(),
            push_files: vec![],
            setup_command: None,
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
        }
    }
}

/// A worker manager that launches workers on remote hosts over SSH.
pub struct RemoteWorkerManager {
    options: RemoteWorkerManagerOptions,
    /// Hosts that have received the pushed files and run the setup command.
    prepared: Mutex<HashSet<String>>,
    children: Mutex<HashMap<WorkerId, Child>>,
}

impl RemoteWorkerManager {
    pub fn new(options: RemoteWorkerManagerOptions) -> Self {
        Self {
            options,
            prepared: Mutex::new(HashSet::new()),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Picks the host for a worker, filling each host up to its worker
    /// count before wrapping around.
    fn host_for_worker(&self, id: WorkerId) -> ExecutionResult<&RemoteHost> {
        if self.options.hosts.is_empty() {
            return Err(ExecutionError::InvalidArgument(
                "no remote hosts configured".to_string(),
            ));
        }
        let capacity: usize = self
            .options
            .hosts
            .iter()
            .map(|host| host.worker_count.max(1))
            .sum();
        let mut slot = (u64::from(id) as usize - 1) % capacity;
        for host in &self.options.hosts {
            let count = host.worker_count.max(1);
            if slot < count {
                return Ok(host);
            }
            slot -= count;
        }
        Err(ExecutionError::InternalError(
            "no host found for worker".to_string(),
        ))
    }

    async fn prepare_host(&self, host: &str) -> ExecutionResult<()> {
        let mut prepared = self.prepared.lock().await;
        if prepared.contains(host) {
            return Ok(());
        }
        for (local, remote) in &self.options.push_files {
            let status = Command::new(&self.options.scp_program)
                .arg(local)
                .arg(format!("{host}:{remote}"))
                .status()
                .await?;
            if !status.success() {
                return Err(ExecutionError::InternalError(format!(
                    "failed to push {} to {host}",
                    local.display()
                )));
            }
        }
        if let Some(command) = &self.options.setup_command {
            let status = Command::new(&self.options.ssh_program)
                .arg(host)
                .arg(command)
                .status()
                .await?;
            if !status.success() {
                return Err(ExecutionError::InternalError(format!(
                    "setup command failed on {host}"
                )));
            }
        }
        info!("remote host {host} is prepared");
        prepared.insert(host.to_string());
        Ok(())
    }
}

#[tonic::async_trait]
impl WorkerManager for RemoteWorkerManager {
    fn mode(&self) -> WorkerTransportMode {
        WorkerTransportMode::External
    }

    async fn launch_worker(
        &self,
        id: WorkerId,
        options: WorkerLaunchOptions,
    ) -> ExecutionResult<()> {
        let host = self.host_for_worker(id)?.host.clone();
        self.prepare_host(&host).await?;
        let command = format!(
            "{}={} {}={} {}={} {}={} {}={} {}",
            env::WORKER_ID,
            u64::from(id),
            env::POOL_EXTERNAL_HOST,
            options.pool_external_host,
            env::POOL_EXTERNAL_PORT,
            options.pool_external_port,
            env::WORKER_HEARTBEAT_INTERVAL_MS,
            options.worker_heartbeat_interval.as_millis(),
            env::ENABLE_TLS,
            options.enable_tls,
            self.options.worker_program,
        );
        let child = Command::new(&self.options.ssh_program)
            .arg(&host)
            .arg(command)
            .kill_on_drop(true)
            .spawn()?;
        self.children.lock().await.insert(id, child);
        Ok(())
    }

    async fn stop_worker(&self, id: WorkerId) -> ExecutionResult<()> {
        let child = self.children.lock().await.remove(&id);
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                warn!("failed to stop remote worker {id}: {e}");
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
                warn!("failed to stop remote worker {id}: {e}");
            }
        }
        Ok(())
    }
}
