use serde_json::Value;
use tokio::sync::oneshot;

use crate::pool::TaskStatus;
use crate::task::{TaskFailure, TaskInput, TaskTarget};

pub enum WorkerEvent {
    ServerReady {
        /// The local port that the worker server listens on.
        /// This may be different from the port accessible from other nodes.
        port: u16,
        signal: oneshot::Sender<()>,
    },
    RunTask {
        task_uid: String,
        attempt: usize,
        target: TaskTarget,
        input: TaskInput,
    },
    StopTask {
        task_uid: String,
        attempt: usize,
    },
    /// A self-scheduled tick that sends a heartbeat to the pool.
    ReportHeartbeat,
    /// The outcome of a task monitor, to be forwarded to the pool.
    ReportTaskStatus {
        task_uid: String,
        attempt: usize,
        status: TaskStatus,
        value: Option<Value>,
        error: Option<TaskFailure>,
    },
    Shutdown,
}
