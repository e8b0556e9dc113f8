mod definition;
mod registry;
pub(crate) mod sizing;

pub use definition::{
    TaskFailure, TaskInput, TaskOutcome, TaskResult, TaskSpec, TaskTarget, TaskValue,
};
pub use registry::{TaskHandler, TaskHandlerRegistry};
