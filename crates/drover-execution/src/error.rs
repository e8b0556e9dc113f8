use thiserror::Error;
use tokio::task::JoinError;

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("error in Tonic transport: {0}")]
    TonicTransportError(#[from] tonic::transport::Error),
    #[error("error in Tonic status: {0}")]
    TonicStatusError(#[from] tonic::Status),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<JoinError> for ExecutionError {
    fn from(error: JoinError) -> Self {
        ExecutionError::InternalError(error.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ExecutionError {
    fn from(error: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ExecutionError::InternalError(error.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ExecutionError {
    fn from(error: tokio::sync::oneshot::error::RecvError) -> Self {
        ExecutionError::InternalError(error.to_string())
    }
}

impl From<prost::UnknownEnumValue> for ExecutionError {
    fn from(error: prost::UnknownEnumValue) -> Self {
        ExecutionError::InvalidArgument(error.to_string())
    }
}

impl From<ExecutionError> for tonic::Status {
    fn from(e: ExecutionError) -> tonic::Status {
        match e {
            ExecutionError::TonicStatusError(e) => e,
            ExecutionError::InvalidArgument(x) => tonic::Status::invalid_argument(x),
            x => tonic::Status::internal(x.to_string()),
        }
    }
}
