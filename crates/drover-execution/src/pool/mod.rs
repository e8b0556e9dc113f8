mod client;
mod core;
mod event;
mod handle;
mod handler;
mod options;
mod server;
pub(crate) mod state;

#[allow(clippy::all)]
mod gen {
    tonic::include_proto!("drover.pool");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("drover_pool_descriptor");
}

pub use client::PoolClient;
pub(crate) use client::WorkerChannel;
pub use event::RescheduleCheck;
pub(crate) use event::{PoolEvent, TaskStatus};
pub(crate) use gen::pool_service_client::PoolServiceClient;
pub use handle::PoolHandle;
pub use options::{PoolOptions, PoolSize};
pub(crate) use self::core::PoolActor;
pub use state::{PoolRunState, PoolStatus, WorkerSnapshot, WorkerStateKind};
