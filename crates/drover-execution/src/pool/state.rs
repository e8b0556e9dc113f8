use std::collections::{HashMap, VecDeque};

use log::warn;
use tokio::time::Instant;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{IdGenerator, WorkerId};
use crate::task::{TaskOutcome, TaskResult, TaskSpec};
use crate::worker::WorkerClient;

/// The scheduling state owned by the pool actor.
/// All mutation happens inside the actor event loop, so no locking is needed.
pub(crate) struct PoolState {
    workers: HashMap<WorkerId, WorkerDescriptor>,
    tasks: HashMap<String, TaskDescriptor>,
    /// Pending task UIDs in FIFO dispatch order.
    /// Rescheduled tasks are appended at the back.
    queue: VecDeque<String>,
    worker_id_generator: IdGenerator<WorkerId>,
    next_task_number: u64,
}

impl PoolState {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            tasks: HashMap::new(),
            queue: VecDeque::new(),
            worker_id_generator: IdGenerator::new(),
            next_task_number: 1,
        }
    }

    pub fn next_worker_id(&mut self) -> ExecutionResult<WorkerId> {
        self.worker_id_generator.next()
    }

    pub fn next_task_uid(&mut self) -> String {
        let uid = format!("task-{}", self.next_task_number);
        self.next_task_number += 1;
        uid
    }

    pub fn add_worker(&mut self, worker_id: WorkerId, descriptor: WorkerDescriptor) {
        self.workers.insert(worker_id, descriptor);
    }

    pub fn get_worker(&self, worker_id: WorkerId) -> Option<&WorkerDescriptor> {
        self.workers.get(&worker_id)
    }

    pub fn get_worker_mut(&mut self, worker_id: WorkerId) -> Option<&mut WorkerDescriptor> {
        self.workers.get_mut(&worker_id)
    }

    pub fn update_worker(
        &mut self,
        worker_id: WorkerId,
        state: WorkerState,
        message: Option<String>,
    ) {
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            warn!("worker {worker_id} not found");
            return;
        };
        if let Some(message) = message {
            worker.messages.push(message);
        }
        worker.state = state;
    }

    /// Records a heartbeat and returns its timestamp,
    /// or [None] if the worker is not running.
    pub fn record_worker_heartbeat(&mut self, worker_id: WorkerId) -> Option<Instant> {
        let worker = self.workers.get_mut(&worker_id)?;
        if let WorkerState::Running { heartbeat_at, .. } = &mut worker.state {
            *heartbeat_at = Instant::now();
            Some(*heartbeat_at)
        } else {
            None
        }
    }

    /// Returns an idle running worker, if any.
    pub fn find_idle_worker(&self) -> Option<WorkerId> {
        self.workers.iter().find_map(|(&worker_id, worker)| {
            matches!(
                worker.state,
                WorkerState::Running {
                    active_task: None,
                    ..
                }
            )
            .then_some(worker_id)
        })
    }

    pub fn count_active_workers(&self) -> usize {
        self.workers
            .values()
            .filter(|worker| {
                matches!(
                    worker.state,
                    WorkerState::Pending | WorkerState::Running { .. }
                )
            })
            .count()
    }

    pub fn list_worker_clients(&self) -> Vec<(WorkerId, WorkerClient)> {
        self.workers
            .iter()
            .filter_map(|(&worker_id, worker)| match &worker.state {
                WorkerState::Running { client, .. } => Some((worker_id, client.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn add_task(&mut self, uid: String, spec: TaskSpec) -> ExecutionResult<()> {
        if self.tasks.contains_key(&uid) {
            return Err(ExecutionError::InvalidArgument(format!(
                "duplicate task UID: {uid}"
            )));
        }
        self.tasks.insert(
            uid.clone(),
            TaskDescriptor {
                spec,
                state: TaskState::Pending,
                assign_count: 0,
                messages: vec![],
            },
        );
        self.queue.push_back(uid);
        Ok(())
    }

    pub fn get_task(&self, uid: &str) -> Option<&TaskDescriptor> {
        self.tasks.get(uid)
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Pops the next pending task and assigns it to the worker,
    /// incrementing its assignment count.
    /// The worker must be running and idle.
    pub fn assign_next_task(&mut self, worker_id: WorkerId) -> ExecutionResult<Option<String>> {
        let Some(uid) = self.queue.front().cloned() else {
            return Ok(None);
        };
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            return Err(ExecutionError::InternalError(format!(
                "worker {worker_id} not found"
            )));
        };
        let WorkerState::Running { active_task, .. } = &mut worker.state else {
            return Err(ExecutionError::InternalError(format!(
                "worker {worker_id} is not running"
            )));
        };
        if active_task.is_some() {
            return Err(ExecutionError::InternalError(format!(
                "worker {worker_id} is busy"
            )));
        }
        let Some(task) = self.tasks.get_mut(&uid) else {
            return Err(ExecutionError::InternalError(format!(
                "task {uid} not found"
            )));
        };
        if !matches!(task.state, TaskState::Pending) {
            return Err(ExecutionError::InternalError(format!(
                "task {uid} is not pending"
            )));
        }
        *active_task = Some(uid.clone());
        task.state = TaskState::Assigned { worker_id };
        task.assign_count += 1;
        self.queue.pop_front();
        Ok(Some(uid))
    }

    /// Marks a task as running on its worker.
    /// Returns `false` for stale or inconsistent updates.
    pub fn run_task(&mut self, uid: &str, attempt: usize, worker_id: WorkerId) -> bool {
        let Some(task) = self.tasks.get_mut(uid) else {
            return false;
        };
        if task.assign_count != attempt {
            return false;
        }
        match task.state {
            TaskState::Assigned { worker_id: w } | TaskState::Running { worker_id: w }
                if w == worker_id =>
            {
                task.state = TaskState::Running { worker_id };
                true
            }
            _ => false,
        }
    }

    /// Returns the worker currently owning the task attempt, detaching the
    /// task from it, or [None] for stale or inconsistent updates.
    pub fn detach_task(&mut self, uid: &str, attempt: usize) -> Option<WorkerId> {
        let task = self.tasks.get_mut(uid)?;
        if task.assign_count != attempt {
            return None;
        }
        let worker_id = match task.state {
            TaskState::Assigned { worker_id } | TaskState::Running { worker_id } => worker_id,
            _ => return None,
        };
        if let Some(worker) = self.workers.get_mut(&worker_id) {
            if let WorkerState::Running { active_task, .. } = &mut worker.state {
                if active_task.as_deref() == Some(uid) {
                    *active_task = None;
                }
            }
        }
        Some(worker_id)
    }

    /// Resets a detached task to pending at the back of the queue.
    pub fn reschedule_task(&mut self, uid: &str) {
        let Some(task) = self.tasks.get_mut(uid) else {
            warn!("task {uid} not found");
            return;
        };
        task.state = TaskState::Pending;
        self.queue.push_back(uid.to_string());
    }

    pub fn finish_task(&mut self, uid: &str, outcome: TaskOutcome) {
        let Some(task) = self.tasks.get_mut(uid) else {
            warn!("task {uid} not found");
            return;
        };
        task.state = TaskState::Finished { outcome };
        // A finished task must not linger in the dispatch queue; this
        // matters when a queued task is finalized by a pool failure.
        self.queue.retain(|x| x != uid);
    }

    /// The task in flight on the worker, if any.
    pub fn find_active_task_for_worker(&self, worker_id: WorkerId) -> Option<(String, usize)> {
        let worker = self.workers.get(&worker_id)?;
        match &worker.state {
            WorkerState::Running {
                active_task: Some(uid),
                ..
            } => self
                .tasks
                .get(uid)
                .map(|task| (uid.clone(), task.assign_count)),
            _ => None,
        }
    }

    pub fn count_unfinished_tasks(&self) -> usize {
        self.tasks
            .values()
            .filter(|task| !matches!(task.state, TaskState::Finished { .. }))
            .count()
    }

    pub fn list_unfinished_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, task)| !matches!(task.state, TaskState::Finished { .. }))
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    pub fn pending_task_weights(&self) -> Vec<u64> {
        self.queue
            .iter()
            .filter_map(|uid| self.tasks.get(uid).map(|task| task.spec.weight))
            .collect()
    }

    pub fn task_result(&self, uid: &str) -> ExecutionResult<Option<TaskResult>> {
        let Some(task) = self.tasks.get(uid) else {
            return Err(ExecutionError::InvalidArgument(format!(
                "unknown task UID: {uid}"
            )));
        };
        match &task.state {
            TaskState::Finished { outcome } => Ok(Some(TaskResult {
                uid: uid.to_string(),
                outcome: outcome.clone(),
                assign_count: task.assign_count,
            })),
            _ => Ok(None),
        }
    }

    pub fn status(&self, failed: bool) -> PoolStatus {
        let mut finished = 0;
        let mut passed = 0;
        let mut task_failed = false;
        let mut task_errored = false;
        for task in self.tasks.values() {
            if let TaskState::Finished { outcome } = &task.state {
                finished += 1;
                match outcome {
                    TaskOutcome::Passed { .. } => passed += 1,
                    TaskOutcome::Failed { .. } => task_failed = true,
                    TaskOutcome::Error { .. } => task_errored = true,
                }
            }
        }
        let total = self.tasks.len();
        let state = if failed || task_errored {
            PoolRunState::Error
        } else if task_failed {
            PoolRunState::Failed
        } else if finished == total {
            PoolRunState::Passed
        } else {
            PoolRunState::Running
        };
        let workers = self
            .workers
            .iter()
            .map(|(&worker_id, worker)| WorkerSnapshot {
                worker_id,
                state: worker.state.kind(),
                active_task: match &worker.state {
                    WorkerState::Running { active_task, .. } => active_task.clone(),
                    _ => None,
                },
            })
            .collect();
        PoolStatus {
            state,
            success: !failed && finished == total && passed == total,
            total_tasks: total,
            finished_tasks: finished,
            pending_tasks: self.queue.len(),
            workers,
        }
    }
}

pub(crate) struct WorkerDescriptor {
    pub state: WorkerState,
    pub messages: Vec<String>,
}

pub(crate) enum WorkerState {
    /// The worker has been launched but has not registered yet.
    Pending,
    Running {
        host: String,
        port: u16,
        client: WorkerClient,
        /// The task currently in flight on the worker, if any.
        active_task: Option<String>,
        heartbeat_at: Instant,
    },
    Stopped,
    Failed,
}

impl WorkerState {
    pub fn kind(&self) -> WorkerStateKind {
        match self {
            WorkerState::Pending => WorkerStateKind::Pending,
            WorkerState::Running { .. } => WorkerStateKind::Running,
            WorkerState::Stopped => WorkerStateKind::Stopped,
            WorkerState::Failed => WorkerStateKind::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStateKind {
    Pending,
    Running,
    Stopped,
    Failed,
}

pub(crate) struct TaskDescriptor {
    pub spec: TaskSpec,
    pub state: TaskState,
    /// The number of times the task has been handed to a worker.
    /// This is also the attempt number of the current assignment.
    pub assign_count: usize,
    #[allow(dead_code)]
    pub messages: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) enum TaskState {
    Pending,
    Assigned { worker_id: WorkerId },
    Running { worker_id: WorkerId },
    Finished { outcome: TaskOutcome },
}

/// The aggregate pool state derived from task outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRunState {
    Running,
    Passed,
    Failed,
    Error,
}

#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub worker_id: WorkerId,
    pub state: WorkerStateKind,
    pub active_task: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub state: PoolRunState,
    pub success: bool,
    pub total_tasks: usize,
    pub finished_tasks: usize,
    pub pending_tasks: usize,
    pub workers: Vec<WorkerSnapshot>,
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::task::TaskTarget;

    fn spec() -> TaskSpec {
        TaskSpec::new(TaskTarget::new("demo", "noop"))
    }

    fn running_worker(state: &mut PoolState) -> WorkerId {
        let worker_id = state.next_worker_id().unwrap();
        state.add_worker(
            worker_id,
            WorkerDescriptor {
                state: WorkerState::Pending,
                messages: vec![],
            },
        );
        state.update_worker(
            worker_id,
            WorkerState::Running {
                host: "127.0.0.1".to_string(),
                port: 0,
                client: WorkerClient::null(),
                active_task: None,
                heartbeat_at: Instant::now(),
            },
            None,
        );
        worker_id
    }

    #[test]
    fn test_duplicate_task_uid() {
        let mut state = PoolState::new();
        state.add_task("a".to_string(), spec()).unwrap();
        assert!(matches!(
            state.add_task("a".to_string(), spec()),
            Err(ExecutionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_fifo_assignment_order() {
        let mut state = PoolState::new();
        for uid in ["t1", "t2", "t3"] {
            state.add_task(uid.to_string(), spec()).unwrap();
        }
        let w1 = running_worker(&mut state);
        let w2 = running_worker(&mut state);
        assert_eq!(state.assign_next_task(w1).unwrap(), Some("t1".to_string()));
        assert_eq!(state.assign_next_task(w2).unwrap(), Some("t2".to_string()));
    }

    #[test]
    fn test_busy_worker_cannot_take_second_task() {
        let mut state = PoolState::new();
        state.add_task("t1".to_string(), spec()).unwrap();
        state.add_task("t2".to_string(), spec()).unwrap();
        let w = running_worker(&mut state);
        assert_eq!(state.assign_next_task(w).unwrap(), Some("t1".to_string()));
        assert!(state.assign_next_task(w).is_err());
    }

    #[test]
    fn test_reschedule_goes_to_back_of_queue() {
        let mut state = PoolState::new();
        for uid in ["t1", "t2"] {
            state.add_task(uid.to_string(), spec()).unwrap();
        }
        let w = running_worker(&mut state);
        assert_eq!(state.assign_next_task(w).unwrap(), Some("t1".to_string()));
        assert_eq!(state.detach_task("t1", 1), Some(w));
        state.reschedule_task("t1");
        assert_eq!(state.assign_next_task(w).unwrap(), Some("t2".to_string()));
        assert_eq!(state.detach_task("t2", 1), Some(w));
        state.finish_task("t2", TaskOutcome::Passed { value: Value::Null });
        assert_eq!(state.assign_next_task(w).unwrap(), Some("t1".to_string()));
        assert_eq!(state.get_task("t1").unwrap().assign_count, 2);
    }

    #[test]
    fn test_stale_attempt_is_rejected() {
        let mut state = PoolState::new();
        state.add_task("t1".to_string(), spec()).unwrap();
        let w = running_worker(&mut state);
        assert_eq!(state.assign_next_task(w).unwrap(), Some("t1".to_string()));
        assert!(!state.run_task("t1", 2, w));
        assert_eq!(state.detach_task("t1", 2), None);
        assert_eq!(state.detach_task("t1", 1), Some(w));
    }

    #[test]
    fn test_terminal_result_is_idempotent() {
        let mut state = PoolState::new();
        state.add_task("t1".to_string(), spec()).unwrap();
        let w = running_worker(&mut state);
        assert_eq!(state.assign_next_task(w).unwrap(), Some("t1".to_string()));
        assert_eq!(state.detach_task("t1", 1), Some(w));
        state.finish_task(
            "t1",
            TaskOutcome::Passed {
                value: Value::from(42),
            },
        );
        let first = state.task_result("t1").unwrap();
        let second = state.task_result("t1").unwrap();
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[test]
    fn test_unknown_task_uid() {
        let state = PoolState::new();
        assert!(matches!(
            state.task_result("missing"),
            Err(ExecutionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_status_aggregation() {
        let mut state = PoolState::new();
        state.add_task("t1".to_string(), spec()).unwrap();
        state.add_task("t2".to_string(), spec()).unwrap();
        let w = running_worker(&mut state);
        assert_eq!(state.status(false).state, PoolRunState::Running);
        assert_eq!(state.assign_next_task(w).unwrap(), Some("t1".to_string()));
        assert_eq!(state.detach_task("t1", 1), Some(w));
        state.finish_task("t1", TaskOutcome::Passed { value: Value::Null });
        assert_eq!(state.assign_next_task(w).unwrap(), Some("t2".to_string()));
        assert_eq!(state.detach_task("t2", 1), Some(w));
        state.finish_task(
            "t2",
            TaskOutcome::Failed {
                error: crate::task::TaskFailure::new("failure", "boom"),
            },
        );
        let status = state.status(false);
        assert_eq!(status.state, PoolRunState::Failed);
        assert!(!status.success);
    }
}
