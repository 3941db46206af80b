//! In-process task queue.
//!
//! Keeps pending and in-progress tasks in submission order and records an
//! [`Activity`] for every task that leaves the queue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{ProcessingError, QueueError, Result};
use crate::queue::{Activity, InitializationChain, TaskQueue, TaskSubmit};
use crate::task::{ExecutionStatus, Task, TaskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryStatus {
    Pending,
    InProgress,
}

#[derive(Debug)]
struct Entry {
    task: Task,
    status: EntryStatus,
    worker_uuid: Option<Uuid>,
    execution_count: u32,
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    activities: HashMap<Uuid, Activity>,
    submit_paused: bool,
    stopping: bool,
}

/// In-memory [`TaskQueue`].
pub struct MemoryQueue {
    state: Mutex<State>,
    initializers: InitializationChain,
}

impl MemoryQueue {
    pub fn new() -> Arc<Self> {
        Self::with_initializers(InitializationChain::default())
    }

    pub fn with_initializers(initializers: InitializationChain) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            initializers,
        })
    }

    /// Enqueue a task after running the initializer chain.
    pub fn submit(&self, mut submit: TaskSubmit) -> Result<Task> {
        if self.is_submit_paused() {
            return Err(QueueError::SubmitPaused.into());
        }
        self.initializers.run(&mut submit)?;
        let task = submit.into_task();

        self.state.lock().entries.push(Entry {
            task: task.clone(),
            status: EntryStatus::Pending,
            worker_uuid: None,
            execution_count: 0,
        });
        tracing::debug!(task_uuid = %task.uuid(), task_type = task.task_type(), "Task submitted");
        Ok(task)
    }

    /// Enqueue several tasks. Stops at the first submission that fails;
    /// tasks enqueued before it stay in the queue.
    pub fn mass_submit(&self, submits: Vec<TaskSubmit>) -> Result<Vec<Task>> {
        submits.into_iter().map(|s| self.submit(s)).collect()
    }

    pub fn pause_submit(&self) {
        self.state.lock().submit_paused = true;
    }

    pub fn resume_submit(&self) {
        self.state.lock().submit_paused = false;
    }

    pub fn is_submit_paused(&self) -> bool {
        self.state.lock().submit_paused
    }

    /// While stopping, `peek` hands out nothing.
    pub fn set_stopping(&self, stopping: bool) {
        self.state.lock().stopping = stopping;
    }

    /// Cancel a pending task.
    pub fn cancel(&self, uuid: Uuid) -> std::result::Result<(), QueueError> {
        let mut state = self.state.lock();
        let idx = state
            .entries
            .iter()
            .position(|e| e.task.uuid() == uuid)
            .ok_or(QueueError::NotInQueue { uuid })?;
        if state.entries[idx].status == EntryStatus::InProgress {
            return Err(QueueError::InProgress { uuid });
        }
        let entry = state.entries.remove(idx);
        record_canceled(&mut state, entry);
        Ok(())
    }

    /// Cancel every pending task. Returns how many were canceled.
    pub fn cancel_all(&self) -> usize {
        self.cancel_where(|e| e.status == EntryStatus::Pending)
    }

    /// Cancel pending tasks that were already handed out once.
    pub fn cancel_worn_outs(&self) -> usize {
        self.cancel_where(|e| e.status == EntryStatus::Pending && e.execution_count >= 1)
    }

    fn cancel_where(&self, pred: impl Fn(&Entry) -> bool) -> usize {
        let mut state = self.state.lock();
        let (canceled, kept): (Vec<Entry>, Vec<Entry>) =
            std::mem::take(&mut state.entries).into_iter().partition(|e| pred(e));
        state.entries = kept;
        let count = canceled.len();
        for entry in canceled {
            record_canceled(&mut state, entry);
        }
        count
    }

    /// Put back to pending every in-progress task whose worker is not in
    /// `known`, e.g. tasks left over by workers of a previous run. Their
    /// execution count is kept, so `cancel_worn_outs` clears them next.
    pub fn reset_tasks_with_unknown_worker_uuids(&self, known: &HashSet<Uuid>) -> usize {
        let mut state = self.state.lock();
        let mut count = 0;
        for entry in state.entries.iter_mut() {
            let owned_by_known = entry.worker_uuid.is_some_and(|w| known.contains(&w));
            if entry.status == EntryStatus::InProgress && !owned_by_known {
                entry.status = EntryStatus::Pending;
                entry.worker_uuid = None;
                count += 1;
            }
        }
        if count > 0 {
            tracing::info!(tasks = count, "Reset tasks of unknown workers");
        }
        count
    }

    /// History record of a finished or canceled task.
    pub fn activity(&self, uuid: Uuid) -> Option<Activity> {
        self.state.lock().activities.get(&uuid).cloned()
    }

    /// Number of tasks still in the queue (pending or in progress).
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.status == EntryStatus::Pending)
            .count()
    }
}

fn record_canceled(state: &mut State, entry: Entry) {
    let uuid = entry.task.uuid();
    state.activities.insert(
        uuid,
        Activity {
            task: entry.task,
            status: ExecutionStatus::Canceled,
            duration: None,
            worker_uuid: entry.worker_uuid,
            execution_count: entry.execution_count,
            error_type: None,
            error_message: None,
            result: None,
            finished_at: Utc::now(),
        },
    );
    tracing::info!(task_uuid = %uuid, "Task canceled");
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn peek(&self, worker_uuid: Uuid) -> std::result::Result<Option<Task>, QueueError> {
        let mut state = self.state.lock();
        if state.stopping {
            return Ok(None);
        }

        // A worker incarnation owns at most one task: anything it left in
        // progress goes back to pending.
        for entry in state.entries.iter_mut() {
            if entry.status == EntryStatus::InProgress && entry.worker_uuid == Some(worker_uuid) {
                entry.status = EntryStatus::Pending;
            }
        }

        let next = state
            .entries
            .iter_mut()
            .find(|e| e.status == EntryStatus::Pending && e.execution_count == 0);
        Ok(next.map(|entry| {
            entry.status = EntryStatus::InProgress;
            entry.worker_uuid = Some(worker_uuid);
            entry.execution_count += 1;
            entry.task.clone()
        }))
    }

    async fn remove(
        &self,
        task: &Task,
        status: ExecutionStatus,
        duration: Duration,
        result: Option<TaskResult>,
        error: Option<&ProcessingError>,
    ) -> std::result::Result<(), QueueError> {
        if error.is_some() && status != ExecutionStatus::Failed {
            return Err(QueueError::ErrorWithoutFailure);
        }

        let mut state = self.state.lock();
        let idx = state
            .entries
            .iter()
            .position(|e| e.task.uuid() == task.uuid())
            .ok_or(QueueError::NotInQueue { uuid: task.uuid() })?;
        let entry = state.entries.remove(idx);

        state.activities.insert(
            task.uuid(),
            Activity {
                task: entry.task,
                status,
                duration: Some(duration),
                worker_uuid: entry.worker_uuid,
                execution_count: entry.execution_count,
                error_type: error.and_then(|e| e.error_type()).map(str::to_string),
                error_message: error.map(|e| e.to_string()),
                result,
                finished_at: Utc::now(),
            },
        );
        Ok(())
    }
}
