mod client;
mod core;
pub(crate) mod entrypoint;
mod event;
mod handler;
pub(crate) mod options;
mod server;

#[allow(clippy::all)]
mod gen {
    tonic::include_proto!("drover.worker");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("drover_worker_descriptor");
}

pub(crate) use client::WorkerClient;
pub(crate) use event::WorkerEvent;
pub(crate) use self::core::WorkerActor;
pub(crate) use gen::worker_service_client::WorkerServiceClient;
pub use options::WorkerOptions;
