use std::sync::Arc;
use std::time::Duration;

use drover_server::RetryStrategy;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::WorkerId;
use crate::pool::PoolClient;
use crate::rpc::ClientOptions;
use crate::task::TaskHandlerRegistry;
use crate::worker_manager::WorkerLaunchOptions;

pub(crate) mod env {
    pub const WORKER_ID: &str = "DROVER__WORKER__ID";
    pub const WORKER_LISTEN_HOST: &str = "DROVER__WORKER__LISTEN_HOST";
    pub const WORKER_LISTEN_PORT: &str = "DROVER__WORKER__LISTEN_PORT";
    pub const WORKER_EXTERNAL_HOST: &str = "DROVER__WORKER__EXTERNAL_HOST";
    pub const WORKER_EXTERNAL_PORT: &str = "DROVER__WORKER__EXTERNAL_PORT";
    pub const WORKER_HEARTBEAT_INTERVAL_MS: &str = "DROVER__WORKER__HEARTBEAT_INTERVAL_MS";
    pub const POOL_EXTERNAL_HOST: &str = "DROVER__POOL__EXTERNAL_HOST";
    pub const POOL_EXTERNAL_PORT: &str = "DROVER__POOL__EXTERNAL_PORT";
    pub const ENABLE_TLS: &str = "DROVER__NETWORK__ENABLE_TLS";
}

#[readonly::make]
pub struct WorkerOptions {
    pub worker_id: WorkerId,
    pub enable_tls: bool,
    /// The transport back to the pool coordinator.
    pub pool: PoolClient,
    pub worker_listen_host: String,
    pub worker_listen_port: u16,
    pub worker_external_host: String,
    pub worker_external_port: Option<u16>,
    pub worker_heartbeat_interval: Duration,
    pub rpc_retry_strategy: RetryStrategy,
    pub registry: Arc<TaskHandlerRegistry>,
}

impl WorkerOptions {
    /// Options for a worker actor hosted in the pool process.
    pub(crate) fn in_process(
        worker_id: WorkerId,
        options: &WorkerLaunchOptions,
        registry: Arc<TaskHandlerRegistry>,
    ) -> Self {
        Self {
            worker_id,
            enable_tls: false,
            pool: options.pool.clone(),
            worker_listen_host: "127.0.0.1".to_string(),
            worker_listen_port: 0,
            worker_external_host: "127.0.0.1".to_string(),
            worker_external_port: None,
            worker_heartbeat_interval: options.worker_heartbeat_interval,
            rpc_retry_strategy: options.rpc_retry_strategy.clone(),
            registry,
        }
    }

    /// Options for a worker process launched by an external worker manager,
    /// read from the `DROVER__*` environment variables.
    pub fn try_from_env(registry: Arc<TaskHandlerRegistry>) -> ExecutionResult<Self> {
        let enable_tls = env_var_opt(env::ENABLE_TLS)?
            .map(|x| x == "true")
            .unwrap_or(false);
        let pool_host = env_var(env::POOL_EXTERNAL_HOST)?;
        let pool_port = parse(env::POOL_EXTERNAL_PORT, env_var(env::POOL_EXTERNAL_PORT)?)?;
        let pool = PoolClient::remote(ClientOptions {
            enable_tls,
            host: pool_host,
            port: pool_port,
        });
        let heartbeat_interval = env_var_opt(env::WORKER_HEARTBEAT_INTERVAL_MS)?
            .map(|x| parse(env::WORKER_HEARTBEAT_INTERVAL_MS, x))
            .transpose()?
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(10));
        Ok(Self {
            worker_id: parse::<u64>(env::WORKER_ID, env_var(env::WORKER_ID)?)?.into(),
            enable_tls,
            pool,
            worker_listen_host: env_var_opt(env::WORKER_LISTEN_HOST)?
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            worker_listen_port: env_var_opt(env::WORKER_LISTEN_PORT)?
                .map(|x| parse(env::WORKER_LISTEN_PORT, x))
                .transpose()?
                .unwrap_or(0),
            worker_external_host: env_var_opt(env::WORKER_EXTERNAL_HOST)?
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            worker_external_port: env_var_opt(env::WORKER_EXTERNAL_PORT)?
                .map(|x| parse(env::WORKER_EXTERNAL_PORT, x))
                .transpose()?,
            worker_heartbeat_interval: heartbeat_interval,
            rpc_retry_strategy: RetryStrategy::ExponentialBackoff {
                max_count: 5,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                factor: 2,
            },
            registry,
        })
    }
}

fn env_var(name: &str) -> ExecutionResult<String> {
    std::env::var(name)
        .map_err(|_| ExecutionError::InvalidArgument(format!("missing environment variable: {name}")))
}

fn env_var_opt(name: &str) -> ExecutionResult<Option<String>> {
    match std::env::var(name) {
        Ok(x) => Ok(Some(x)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ExecutionError::InvalidArgument(format!("{name}: {e}"))),
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: String) -> ExecutionResult<T> {
    value
        .parse()
        .map_err(|_| ExecutionError::InvalidArgument(format!("invalid value for {name}: {value}")))
}
