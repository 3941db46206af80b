//! Task queue boundary.
//!
//! - `TaskQueue` — what a worker needs from the queue (peek / remove)
//! - `init` — initializer chain run when a task is submitted
//! - `memory` — in-process queue with submission, cancellation and history

pub mod init;
pub mod memory;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ProcessingError, QueueError};
use crate::task::{Component, ExecutionStatus, Task, TaskBuilder, TaskResult};

pub use init::{InitializationChain, TaskInitializer};
pub use memory::MemoryQueue;

/// Queue operations used by workers. Must be safe to call from many workers
/// at once; a task is handed to at most one worker.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Take the next task for the worker incarnation `worker_uuid`.
    async fn peek(&self, worker_uuid: Uuid) -> Result<Option<Task>, QueueError>;

    /// Finalize a task. `error` may only be given with [`ExecutionStatus::Failed`].
    async fn remove(
        &self,
        task: &Task,
        status: ExecutionStatus,
        duration: Duration,
        result: Option<TaskResult>,
        error: Option<&ProcessingError>,
    ) -> Result<(), QueueError>;
}

/// Request to enqueue a task.
#[derive(Debug, Clone)]
pub struct TaskSubmit {
    pub task_type: String,
    pub component: Option<Component>,
    pub main_component: Option<Component>,
    pub submitter_uuid: Option<String>,
    pub submitter_login: Option<String>,
    pub characteristics: BTreeMap<String, String>,
}

impl TaskSubmit {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            component: None,
            main_component: None,
            submitter_uuid: None,
            submitter_login: None,
            characteristics: BTreeMap::new(),
        }
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }

    pub fn with_submitter(mut self, uuid: impl Into<String>, login: impl Into<String>) -> Self {
        self.submitter_uuid = Some(uuid.into());
        self.submitter_login = Some(login.into());
        self
    }

    pub fn with_characteristic(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.characteristics.insert(key.into(), value.into());
        self
    }

    fn into_task(self) -> Task {
        let mut builder = TaskBuilder::new(self.task_type);
        if let Some(component) = self.component {
            builder = builder.component(component);
        }
        if let Some(main) = self.main_component {
            builder = builder.main_component(main);
        }
        if let Some(uuid) = self.submitter_uuid {
            builder = builder.submitter(uuid, self.submitter_login);
        }
        for (key, value) in self.characteristics {
            builder = builder.characteristic(key, value);
        }
        builder.build()
    }
}

/// History record of a task that left the queue.
#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub task: Task,
    pub status: ExecutionStatus,
    pub duration: Option<Duration>,
    pub worker_uuid: Option<Uuid>,
    pub execution_count: u32,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub result: Option<TaskResult>,
    pub finished_at: DateTime<Utc>,
}
