use std::fmt;
use std::fmt::Formatter;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::WorkerId;
use crate::pool::client::WorkerChannel;
use crate::pool::gen;
use crate::pool::state::PoolStatus;
use crate::task::{TaskFailure, TaskResult, TaskSpec};

/// A predicate consulted after every task completion to decide whether the
/// task should be reassigned. It is consulted on success as well as failure,
/// and its decision is always subject to the retry budget.
pub type RescheduleCheck = Arc<dyn Fn(&PoolStatus, &TaskResult) -> bool + Send + Sync>;

pub enum PoolEvent {
    ServerReady {
        /// The local port that the pool server listens on.
        /// This may be different from the port accessible from other nodes.
        port: u16,
        signal: oneshot::Sender<()>,
    },
    Start {
        result: oneshot::Sender<ExecutionResult<()>>,
    },
    AddTask {
        spec: TaskSpec,
        result: oneshot::Sender<ExecutionResult<String>>,
    },
    PollResult {
        task_uid: String,
        result: oneshot::Sender<ExecutionResult<Option<TaskResult>>>,
    },
    SetRescheduleCheck {
        check: RescheduleCheck,
    },
    RegisterWorker {
        worker_id: WorkerId,
        channel: WorkerChannel,
        result: oneshot::Sender<ExecutionResult<()>>,
    },
    WorkerHeartbeat {
        worker_id: WorkerId,
    },
    ProbePendingWorker {
        worker_id: WorkerId,
    },
    ProbeLostWorker {
        worker_id: WorkerId,
        instant: Instant,
    },
    UpdateTask {
        worker_id: WorkerId,
        task_uid: String,
        attempt: usize,
        status: TaskStatus,
        value: Option<Value>,
        error: Option<TaskFailure>,
    },
    ObserveStatus {
        result: oneshot::Sender<PoolStatus>,
    },
    Shutdown,
}

/// The observed task status reported by workers.
#[derive(Debug, Clone, Copy)]
pub enum TaskStatus {
    Running,
    Passed,
    Failed,
    Canceled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Running => write!(f, "RUNNING"),
            TaskStatus::Passed => write!(f, "PASSED"),
            TaskStatus::Failed => write!(f, "FAILED"),
            TaskStatus::Canceled => write!(f, "CANCELED"),
        }
    }
}

impl TryFrom<gen::TaskStatus> for TaskStatus {
    type Error = ExecutionError;

    fn try_from(value: gen::TaskStatus) -> ExecutionResult<Self> {
        match value {
            gen::TaskStatus::Unspecified => Err(ExecutionError::InvalidArgument(
                "unspecified task status".to_string(),
            )),
            gen::TaskStatus::Running => Ok(Self::Running),
            gen::TaskStatus::Passed => Ok(Self::Passed),
            gen::TaskStatus::Failed => Ok(Self::Failed),
            gen::TaskStatus::Canceled => Ok(Self::Canceled),
        }
    }
}

impl From<TaskStatus> for gen::TaskStatus {
    fn from(value: TaskStatus) -> Self {
        match value {
            TaskStatus::Running => gen::TaskStatus::Running,
            TaskStatus::Passed => gen::TaskStatus::Passed,
            TaskStatus::Failed => gen::TaskStatus::Failed,
            TaskStatus::Canceled => gen::TaskStatus::Canceled,
        }
    }
}
