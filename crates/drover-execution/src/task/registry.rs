use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ExecutionError, ExecutionResult};
use crate::task::definition::{TaskFailure, TaskInput, TaskTarget, TaskValue};

/// A callable registered for a task target.
/// Handlers run on a blocking thread so they may perform long work.
pub trait TaskHandler: Send + Sync + 'static {
    fn run(&self, input: TaskInput) -> Result<TaskValue, TaskFailure>;
}

impl<F> TaskHandler for F
where
    F: Fn(TaskInput) -> Result<TaskValue, TaskFailure> + Send + Sync + 'static,
{
    fn run(&self, input: TaskInput) -> Result<TaskValue, TaskFailure> {
        self(input)
    }
}

/// The map from task targets to handlers, populated once before workers
/// start and immutable afterwards.
#[derive(Default)]
pub struct TaskHandlerRegistry {
    handlers: HashMap<TaskTarget, Arc<dyn TaskHandler>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        module: impl Into<String>,
        symbol: impl Into<String>,
        handler: impl TaskHandler,
    ) {
        self.handlers
            .insert(TaskTarget::new(module, symbol), Arc::new(handler));
    }

    pub fn resolve(&self, target: &TaskTarget) -> ExecutionResult<Arc<dyn TaskHandler>> {
        self.handlers
            .get(target)
            .cloned()
            .ok_or_else(|| ExecutionError::InvalidArgument(format!("unknown task target: {target}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_registered_handler() {
        let mut registry = TaskHandlerRegistry::new();
        registry.register("demo", "noop", |_: TaskInput| Ok(TaskValue::null()));
        let target = TaskTarget::new("demo", "noop");
        let handler = registry.resolve(&target);
        assert!(handler.is_ok());
    }

    #[test]
    fn test_resolve_unknown_target() {
        let registry = TaskHandlerRegistry::new();
        let target = TaskTarget::new("demo", "missing");
        assert!(matches!(
            registry.resolve(&target),
            Err(ExecutionError::InvalidArgument(_))
        ));
    }
}
