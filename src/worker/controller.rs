//! Worker enablement and runtime tracking.
//!
//! - `EnabledWorkerController` answers "is worker N enabled?" from the live
//!   worker count, and can be asked to re-read it.
//! - `WorkerController` additionally tracks which execution context runs
//!   which worker and which task that worker is processing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::task::Task;
use crate::worker::context::{ExecutionContext, ExecutionId};

/// Identity of one worker incarnation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerIdentity {
    /// Slot in the pool, stable for the worker's lifetime.
    pub ordinal: i32,
    /// Distinguishes incarnations across restarts.
    pub uuid: Uuid,
}

impl WorkerIdentity {
    pub fn new(ordinal: i32) -> Self {
        Self {
            ordinal,
            uuid: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}-{}", self.ordinal, self.uuid)
    }
}

/// Enablement from the configured worker count. Keeps no other state.
pub struct EnabledWorkerController {
    config: EngineConfig,
}

impl EnabledWorkerController {
    pub fn new(config: EngineConfig) -> Self {
        let controller = Self { config };
        controller.log_worker_count(controller.config.worker_count());
        controller
    }

    /// Re-reads the worker count on every call. Negative ordinals are
    /// malformed and treated as enabled.
    pub fn is_enabled(&self, ordinal: i32) -> bool {
        ordinal < self.config.worker_count()
    }

    /// Re-read the worker count now and log it when it describes a pool.
    pub fn refresh(&self) -> i32 {
        let count = self.config.worker_count();
        self.log_worker_count(count);
        count
    }

    fn log_worker_count(&self, count: i32) {
        if count > 1 {
            tracing::info!("Compute Engine will use {} concurrent workers to process tasks", count);
        }
    }
}

#[derive(Debug, Default)]
struct RuntimeState {
    execution: Option<ExecutionContext>,
    current_task: Option<Task>,
}

/// Enablement plus the worker ↔ execution ↔ task registry shared by all
/// workers.
pub struct WorkerController {
    enabled: Arc<EnabledWorkerController>,
    states: RwLock<HashMap<WorkerIdentity, RuntimeState>>,
}

impl WorkerController {
    pub fn new(enabled: Arc<EnabledWorkerController>) -> Self {
        Self {
            enabled,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> &Arc<EnabledWorkerController> {
        &self.enabled
    }

    pub fn is_enabled(&self, ordinal: i32) -> bool {
        self.enabled.is_enabled(ordinal)
    }

    /// Record that `worker` now runs on `ctx`. The returned guard unregisters
    /// the worker when dropped.
    pub fn register(&self, worker: WorkerIdentity, ctx: &ExecutionContext) -> Registration<'_> {
        self.states.write().insert(
            worker,
            RuntimeState {
                execution: Some(ctx.clone()),
                current_task: None,
            },
        );
        Registration {
            controller: self,
            worker,
        }
    }

    pub fn unregister(&self, worker: WorkerIdentity) {
        self.states.write().remove(&worker);
    }

    /// Set or clear the task `worker` is processing. Ignored if the worker is
    /// not registered.
    pub fn set_current_task(&self, worker: WorkerIdentity, task: Option<Task>) {
        if let Some(state) = self.states.write().get_mut(&worker) {
            state.current_task = task;
        }
    }

    /// Worker currently registered on execution `id`.
    pub fn worker_on(&self, id: ExecutionId) -> Option<WorkerIdentity> {
        self.states
            .read()
            .iter()
            .find(|(_, state)| state.execution.as_ref().is_some_and(|e| e.id() == id))
            .map(|(worker, _)| *worker)
    }

    pub fn is_executed_by(&self, worker: WorkerIdentity, id: ExecutionId) -> bool {
        self.states
            .read()
            .get(&worker)
            .and_then(|state| state.execution.as_ref())
            .is_some_and(|e| e.id() == id)
    }

    pub fn current_task(&self, worker: WorkerIdentity) -> Option<Task> {
        self.states
            .read()
            .get(&worker)
            .and_then(|state| state.current_task.clone())
    }

    /// Tasks being processed right now, by worker.
    pub fn executing_tasks(&self) -> Vec<(WorkerIdentity, Task)> {
        self.states
            .read()
            .iter()
            .filter_map(|(worker, state)| state.current_task.clone().map(|t| (*worker, t)))
            .collect()
    }

    /// Interrupt the execution processing `task_uuid`. Returns false if no
    /// worker is processing it.
    pub fn interrupt_task(&self, task_uuid: Uuid) -> bool {
        let states = self.states.read();
        let execution = states.values().find_map(|state| {
            let processing = state
                .current_task
                .as_ref()
                .is_some_and(|t| t.uuid() == task_uuid);
            if processing { state.execution.clone() } else { None }
        });
        match execution {
            Some(ctx) => {
                tracing::info!(task_uuid = %task_uuid, execution = %ctx.id(), "Interrupting task");
                ctx.interrupt();
                true
            }
            None => false,
        }
    }
}

/// Keeps a worker registered until dropped.
#[must_use = "the worker is unregistered as soon as the registration is dropped"]
pub struct Registration<'a> {
    controller: &'a WorkerController,
    worker: WorkerIdentity,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.controller.unregister(self.worker);
    }
}
