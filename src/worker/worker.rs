//! Poll-and-process worker.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{Error, FinalizationError, ProcessingError};
use crate::processor::ProcessorRegistry;
use crate::queue::TaskQueue;
use crate::task::{ExecutionStatus, PollResult, Task, TaskResult};
use crate::worker::context::ExecutionContext;
use crate::worker::controller::{WorkerController, WorkerIdentity};
use crate::worker::listener::ExecutionListener;
use crate::worker::panic_message;

/// Something the scheduler can poll repeatedly. A worker is never polled
/// concurrently with itself.
#[async_trait]
pub trait Worker: Send + Sync {
    fn identity(&self) -> WorkerIdentity;

    /// One poll-and-maybe-process cycle.
    async fn poll(&self, ctx: &ExecutionContext) -> Result<PollResult, Error>;

    /// True while `ctx` is inside a `poll` of this worker.
    fn is_executed_by(&self, ctx: &ExecutionContext) -> bool;

    /// Task being processed, between dequeue and removal from the queue.
    fn current_task(&self) -> Option<Task>;
}

/// Shared dependencies for worker execution.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Arc<dyn TaskQueue>,
    pub registry: Arc<ProcessorRegistry>,
    pub controller: Arc<WorkerController>,
    pub listeners: Vec<Arc<dyn ExecutionListener>>,
}

/// Worker that pulls tasks from a [`TaskQueue`].
pub struct QueueWorker {
    identity: WorkerIdentity,
    deps: WorkerDeps,
}

struct Outcome {
    status: ExecutionStatus,
    result: Option<TaskResult>,
    error: Option<ProcessingError>,
}

impl QueueWorker {
    /// Create a worker for slot `ordinal` with a fresh uuid.
    pub fn new(ordinal: i32, deps: WorkerDeps) -> Self {
        Self {
            identity: WorkerIdentity::new(ordinal),
            deps,
        }
    }

    fn controller(&self) -> &Arc<WorkerController> {
        &self.deps.controller
    }

    async fn poll_inner(&self, ctx: &ExecutionContext) -> Result<PollResult, Error> {
        if !self.controller().is_enabled(self.identity.ordinal) {
            return Ok(PollResult::Disabled);
        }

        let _registration = self.controller().register(self.identity, ctx);

        let Some(task) = self.deps.queue.peek(self.identity.uuid).await? else {
            return Ok(PollResult::NoTask);
        };

        let span = tracing::info_span!(
            "ce_task",
            task_uuid = %task.uuid(),
            task_type = task.task_type(),
        );
        self.execute(&task, ctx).instrument(span).await?;
        Ok(PollResult::TaskProcessed)
    }

    async fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Result<(), Error> {
        let started = Instant::now();
        log_start(task);

        for (started_count, listener) in self.deps.listeners.iter().enumerate() {
            if let Err(err) = listener.on_start(task) {
                let started_listeners = &self.deps.listeners[..started_count];
                end_listeners(
                    started_listeners,
                    task,
                    ExecutionStatus::Failed,
                    started.elapsed(),
                    None,
                );
                return Err(err);
            }
        }

        let outcome = self.process(task, ctx).await;
        let duration = started.elapsed();

        let removal = self
            .deps
            .queue
            .remove(
                task,
                outcome.status,
                duration,
                outcome.result,
                outcome.error.as_ref(),
            )
            .await;
        self.controller().set_current_task(self.identity, None);

        let error = match removal {
            Ok(()) => outcome.error,
            Err(source) => {
                let err = FinalizationError {
                    task_uuid: task.uuid(),
                    source,
                    suppressed: outcome.error,
                };
                tracing::error!(
                    suppressed = err.suppressed.as_ref().map(tracing::field::display),
                    "{}",
                    err
                );
                err.into_suppressed()
            }
        };

        tracing::info!(
            status = %outcome.status,
            time_ms = duration.as_millis() as u64,
            submitter = task.submitter().map(tracing::field::display),
            "Executed task"
        );

        let listeners = &self.deps.listeners;
        match end_listeners(listeners, task, outcome.status, duration, error.as_ref()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn process(&self, task: &Task, ctx: &ExecutionContext) -> Outcome {
        let Some(processor) = self.deps.registry.resolve(task) else {
            tracing::error!(
                "No TaskProcessor is defined for task of type {}. Plugin configuration may have changed",
                task.task_type()
            );
            return Outcome {
                status: ExecutionStatus::Failed,
                result: None,
                error: None,
            };
        };

        self.controller()
            .set_current_task(self.identity, Some(task.clone()));

        let run = AssertUnwindSafe(processor.process(task, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ProcessingError::Other(panic_error(panic))));

        match run {
            Ok(result) => Outcome {
                status: ExecutionStatus::Success,
                result,
                error: None,
            },
            Err(err) => {
                if !err.is_user_facing() {
                    tracing::error!(error = %err, "Failed to execute task {}", task.uuid());
                }
                Outcome {
                    status: ExecutionStatus::Failed,
                    result: None,
                    error: Some(err),
                }
            }
        }
    }
}

/// Call `on_end` on every listener. Returns the first failure; later ones
/// are only logged.
fn end_listeners(
    listeners: &[Arc<dyn ExecutionListener>],
    task: &Task,
    status: ExecutionStatus,
    duration: Duration,
    error: Option<&ProcessingError>,
) -> Option<Error> {
    let mut first = None;
    for listener in listeners {
        if let Err(err) = listener.on_end(task, status, duration, error) {
            if first.is_none() {
                first = Some(err);
            } else {
                tracing::error!(error = %err, "Execution listener failed after task end");
            }
        }
    }
    first
}

fn log_start(task: &Task) {
    tracing::info!(
        submitter = task.submitter().map(tracing::field::display),
        characteristics = ?task.characteristics(),
        "Execute task"
    );
}

fn panic_error(panic: Box<dyn std::any::Any + Send>) -> anyhow::Error {
    anyhow::anyhow!("Task processor panicked: {}", panic_message(panic))
}

#[async_trait]
impl Worker for QueueWorker {
    fn identity(&self) -> WorkerIdentity {
        self.identity
    }

    async fn poll(&self, ctx: &ExecutionContext) -> Result<PollResult, Error> {
        let span = tracing::info_span!(
            "ce_worker",
            ordinal = self.identity.ordinal,
            worker_uuid = %self.identity.uuid,
        );
        self.poll_inner(ctx).instrument(span).await
    }

    fn is_executed_by(&self, ctx: &ExecutionContext) -> bool {
        self.controller().is_executed_by(self.identity, ctx.id())
    }

    fn current_task(&self) -> Option<Task> {
        self.controller().current_task(self.identity)
    }
}

/// Creates one worker per ordinal.
pub trait WorkerFactory: Send + Sync {
    fn create(&self, ordinal: i32) -> Arc<dyn Worker>;

    /// Every worker created so far.
    fn workers(&self) -> Vec<Arc<dyn Worker>>;

    /// Uuids of every worker created so far.
    fn worker_uuids(&self) -> HashSet<Uuid> {
        self.workers().iter().map(|w| w.identity().uuid).collect()
    }
}

/// Factory of [`QueueWorker`]s sharing the same dependencies.
pub struct QueueWorkerFactory {
    deps: WorkerDeps,
    workers: Mutex<Vec<Arc<dyn Worker>>>,
}

impl QueueWorkerFactory {
    pub fn new(deps: WorkerDeps) -> Self {
        Self {
            deps,
            workers: Mutex::new(Vec::new()),
        }
    }
}

impl WorkerFactory for QueueWorkerFactory {
    fn create(&self, ordinal: i32) -> Arc<dyn Worker> {
        let worker: Arc<dyn Worker> = Arc::new(QueueWorker::new(ordinal, self.deps.clone()));
        self.workers.lock().push(Arc::clone(&worker));
        worker
    }

    fn workers(&self) -> Vec<Arc<dyn Worker>> {
        self.workers.lock().clone()
    }
}
