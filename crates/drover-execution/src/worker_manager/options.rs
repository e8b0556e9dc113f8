use std::time::Duration;

use drover_server::RetryStrategy;

use crate::pool::PoolClient;

/// The launch parameters handed to a worker manager by the pool.
pub struct WorkerLaunchOptions {
    pub(crate) enable_tls: bool,
    /// The transport that in-process workers use to reach the pool.
    pub(crate) pool: PoolClient,
    /// The pool address advertised to external worker processes.
    pub(crate) pool_external_host: String,
    pub(crate) pool_external_port: u16,
    pub(crate) worker_heartbeat_interval: Duration,
    pub(crate) rpc_retry_strategy: RetryStrategy,
}
