pub mod error;
mod id;
pub mod pool;
mod rpc;
pub mod task;
mod worker;
pub mod worker_manager;

pub use id::WorkerId;
pub use pool::{
    PoolClient, PoolHandle, PoolOptions, PoolRunState, PoolSize, PoolStatus, RescheduleCheck,
    WorkerSnapshot, WorkerStateKind,
};
pub use task::{
    TaskFailure, TaskHandlerRegistry, TaskInput, TaskOutcome, TaskResult, TaskSpec, TaskTarget,
    TaskValue,
};
pub use worker::entrypoint::run_worker;
pub use worker::WorkerOptions;
