//! Worker pool runtime.
//!
//! Core components:
//! - `context` — execution handles carrying interruption
//! - `controller` — worker enablement and worker/execution/task tracking
//! - `interrupter` — cooperative cancellation and task timeout
//! - `listener` — hooks around each task execution
//! - `worker` — one poll-and-process cycle against the queue
//! - `scheduler` — one self-rescheduling polling chain per worker

pub mod context;
pub mod controller;
pub mod interrupter;
pub mod listener;
pub mod scheduler;
pub mod worker;

pub use context::{ExecutionContext, ExecutionId};
pub use controller::{EnabledWorkerController, Registration, WorkerController, WorkerIdentity};
pub use interrupter::{
    CancellationOnlyInterrupter, TaskInterrupter, TimeoutInterrupter, interrupter_from_config,
};
pub use listener::{ExecutionListener, InterrupterListener};
pub use scheduler::{Delays, Scheduler};
pub use worker::{QueueWorker, QueueWorkerFactory, Worker, WorkerDeps, WorkerFactory};

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
