use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A reference to the callable that a worker resolves and invokes.
/// The pool never interprets the target; it is resolved through the
/// worker-side handler registry.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskTarget {
    pub module: String,
    pub symbol: String,
}

impl TaskTarget {
    pub fn new(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for TaskTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.symbol)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskInput {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl TaskInput {
    pub fn with_args(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }
}

/// A unit of work submitted to the pool.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// The caller-assigned UID, or [None] to let the pool generate one.
    pub uid: Option<String>,
    pub target: TaskTarget,
    pub input: TaskInput,
    /// The number of additional attempts permitted after a failure,
    /// on top of the first attempt. The pool-wide retry limit still applies.
    pub rerun: usize,
    /// A cost hint used only by pool auto-sizing.
    pub weight: u64,
}

impl TaskSpec {
    pub fn new(target: TaskTarget) -> Self {
        Self {
            uid: None,
            target,
            input: TaskInput::default(),
            rerun: 0,
            weight: 0,
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_input(mut self, input: TaskInput) -> Self {
        self.input = input;
        self
    }

    pub fn with_rerun(mut self, rerun: usize) -> Self {
        self.rerun = rerun;
        self
    }

    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }
}

/// The value produced by a task handler.
/// Values that cannot be represented as JSON are carried as an opaque
/// displayable object and converted to their string representation
/// before leaving the worker.
pub enum TaskValue {
    Json(Value),
    Opaque(Box<dyn fmt::Display + Send>),
}

impl TaskValue {
    pub fn null() -> Self {
        Self::Json(Value::Null)
    }

    pub fn opaque(value: impl fmt::Display + Send + 'static) -> Self {
        Self::Opaque(Box::new(value))
    }

    /// Converts the value into its wire representation.
    pub fn into_wire(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Opaque(value) => Value::String(value.to_string()),
        }
    }
}

impl fmt::Debug for TaskValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Opaque(value) => f.debug_tuple("Opaque").field(&value.to_string()).finish(),
        }
    }
}

/// A structured failure raised by task execution.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: String,
    pub message: String,
    pub trace: Option<String>,
}

impl TaskFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The terminal outcome of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Passed {
        value: Value,
    },
    Failed {
        error: TaskFailure,
    },
    /// An unrecoverable error: retry budget exhausted, worker lost with
    /// no budget left, or the pool failed to make progress.
    Error {
        message: String,
    },
}

impl TaskOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

/// The terminal result of a task as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub uid: String,
    pub outcome: TaskOutcome,
    /// The number of times the task was handed to a worker.
    pub assign_count: usize,
}
