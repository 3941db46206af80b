//! Cooperative cancellation and timeout of running tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{ConfigError, Error, InterruptError, StateError};
use crate::task::Task;
use crate::worker::context::ExecutionContext;
use crate::worker::controller::WorkerController;

/// Decides whether the task running under a context must stop.
///
/// Processing code calls [`check`](TaskInterrupter::check) at natural
/// checkpoints and propagates the error it returns.
pub trait TaskInterrupter: Send + Sync {
    fn check(&self, ctx: &ExecutionContext) -> Result<(), Error>;

    fn on_start(&self, task: &Task);

    fn on_end(&self, task: &Task);
}

fn canceled(ctx: &ExecutionContext) -> Error {
    InterruptError::Canceled {
        execution: ctx.id().to_string(),
    }
    .into()
}

/// Only honours interruption of the execution context.
#[derive(Debug, Default, Clone, Copy)]
pub struct CancellationOnlyInterrupter;

impl TaskInterrupter for CancellationOnlyInterrupter {
    fn check(&self, ctx: &ExecutionContext) -> Result<(), Error> {
        if ctx.is_interrupted() {
            return Err(canceled(ctx));
        }
        Ok(())
    }

    fn on_start(&self, _task: &Task) {}

    fn on_end(&self, _task: &Task) {}
}

/// Interruption plus a maximum run time per task.
pub struct TimeoutInterrupter {
    timeout: Duration,
    controller: Arc<WorkerController>,
    start_times: Mutex<HashMap<Uuid, Instant>>,
}

impl TimeoutInterrupter {
    pub fn new(timeout: Duration, controller: Arc<WorkerController>) -> Self {
        tracing::info!("Compute Engine Task timeout enabled: {} ms", timeout.as_millis());
        Self {
            timeout,
            controller,
            start_times: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl TaskInterrupter for TimeoutInterrupter {
    fn check(&self, ctx: &ExecutionContext) -> Result<(), Error> {
        let task = self
            .controller
            .worker_on(ctx.id())
            .and_then(|worker| self.controller.current_task(worker))
            .ok_or_else(|| StateError::NoTaskOnExecution {
                execution: ctx.id().to_string(),
            })?;

        // Cancellation wins over an expired timeout.
        if ctx.is_interrupted() {
            return Err(canceled(ctx));
        }

        let started = self
            .start_times
            .lock()
            .get(&task.uuid())
            .copied()
            .ok_or(StateError::NoStartTime {
                task_uuid: task.uuid(),
            })?;

        let elapsed = started.elapsed();
        if elapsed >= self.timeout {
            return Err(InterruptError::TimedOut { elapsed }.into());
        }
        Ok(())
    }

    fn on_start(&self, task: &Task) {
        self.start_times.lock().insert(task.uuid(), Instant::now());
    }

    fn on_end(&self, task: &Task) {
        self.start_times.lock().remove(&task.uuid());
    }
}

/// Pick the interrupter for this configuration: timeout enforcement when
/// `taskTimeoutSeconds` is set, cancellation only otherwise.
pub fn interrupter_from_config(
    config: &EngineConfig,
    controller: Arc<WorkerController>,
) -> Result<Arc<dyn TaskInterrupter>, ConfigError> {
    Ok(match config.task_timeout()? {
        Some(timeout) => Arc::new(TimeoutInterrupter::new(timeout, controller)),
        None => Arc::new(CancellationOnlyInterrupter),
    })
}
