use std::sync::Arc;
use std::time::Duration;

use drover_server::RetryStrategy;

use crate::worker_manager::WorkerManager;

/// The number of workers to start, either a fixed count or a count estimated
/// from the weights of the tasks submitted before the pool starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSize {
    Fixed(usize),
    Auto,
}

#[readonly::make]
pub struct PoolOptions {
    pub size: PoolSize,
    pub enable_tls: bool,
    pub pool_listen_host: String,
    pub pool_listen_port: u16,
    pub pool_external_host: String,
    pub pool_external_port: Option<u16>,
    pub worker_heartbeat_interval: Duration,
    pub worker_heartbeat_miss_limit: u32,
    pub worker_launch_timeout: Duration,
    pub worker_stop_timeout: Duration,
    pub worker_max_count: usize,
    /// The pool-wide cap on the number of times any task may be assigned.
    pub task_retries_limit: usize,
    /// The interval at which callers waiting for a result poll the pool.
    pub result_poll_interval: Duration,
    /// The target accumulated task weight per worker for auto-sized pools.
    pub auto_task_runtime_limit: u64,
    pub rpc_retry_strategy: RetryStrategy,
    pub worker_manager: Arc<dyn WorkerManager>,
}

impl PoolOptions {
    pub fn new(worker_manager: Arc<dyn WorkerManager>) -> Self {
        Self {
            size: PoolSize::Fixed(4),
            enable_tls: false,
            pool_listen_host: "127.0.0.1".to_string(),
            pool_listen_port: 0,
            pool_external_host: "127.0.0.1".to_string(),
            pool_external_port: None,
            worker_heartbeat_interval: Duration::from_secs(10),
            worker_heartbeat_miss_limit: 3,
            worker_launch_timeout: Duration::from_secs(60),
            worker_stop_timeout: Duration::from_secs(30),
            worker_max_count: 16,
            task_retries_limit: 3,
            result_poll_interval: Duration::from_millis(100),
            auto_task_runtime_limit: 3600,
            rpc_retry_strategy: RetryStrategy::ExponentialBackoff {
                max_count: 5,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                factor: 2,
            },
            worker_manager,
        }
    }

    pub fn with_size(mut self, size: PoolSize) -> Self {
        self.size = size;
        self
    }

    pub fn with_worker_heartbeat(mut self, interval: Duration, miss_limit: u32) -> Self {
        self.worker_heartbeat_interval = interval;
        self.worker_heartbeat_miss_limit = miss_limit;
        self
    }

    pub fn with_worker_launch_timeout(mut self, timeout: Duration) -> Self {
        self.worker_launch_timeout = timeout;
        self
    }

    pub fn with_worker_stop_timeout(mut self, timeout: Duration) -> Self {
        self.worker_stop_timeout = timeout;
        self
    }

    pub fn with_worker_max_count(mut self, count: usize) -> Self {
        self.worker_max_count = count;
        self
    }

    pub fn with_task_retries_limit(mut self, limit: usize) -> Self {
        self.task_retries_limit = limit;
        self
    }

    pub fn with_result_poll_interval(mut self, interval: Duration) -> Self {
        self.result_poll_interval = interval;
        self
    }

    pub fn with_auto_task_runtime_limit(mut self, limit: u64) -> Self {
        self.auto_task_runtime_limit = limit;
        self
    }

    /// The heartbeat timeout after which a worker is declared lost.
    pub fn worker_heartbeat_timeout(&self) -> Duration {
        self.worker_heartbeat_interval * self.worker_heartbeat_miss_limit
    }
}
