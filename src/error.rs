//! Error types for the task pool.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Interrupted: {0}")]
    Interrupt(#[from] InterruptError),

    #[error("Illegal state: {0}")]
    State(#[from] StateError),

    #[error("Task initialization failed: {0}")]
    Init(#[from] InitError),

    #[error("Execution listener {listener} failed: {reason}")]
    Listener { listener: String, reason: String },

    #[error(transparent)]
    Finalization(#[from] FinalizationError),

    /// Unrecoverable failure. Ends the rescheduling chain of the worker
    /// that raised it.
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether this error must stop the worker's polling chain.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// The queue could not record the outcome of a task. The processing
/// failure, if any, rides along as a secondary cause.
#[derive(Debug, thiserror::Error)]
#[error("Failed to finalize task with uuid '{task_uuid}' and persist its state to db: {source}")]
pub struct FinalizationError {
    pub task_uuid: Uuid,
    #[source]
    pub source: QueueError,
    pub suppressed: Option<ProcessingError>,
}

impl FinalizationError {
    /// Give back the processing failure attached to this error.
    pub fn into_suppressed(self) -> Option<ProcessingError> {
        self.suppressed
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by a task queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Compute Engine does not currently accept new tasks")]
    SubmitPaused,

    #[error("Task is not in queue: {uuid}")]
    NotInQueue { uuid: Uuid },

    #[error("Task is in progress and can't be canceled [uuid={uuid}]")]
    InProgress { uuid: Uuid },

    #[error("Error can be provided only when status is FAILED")]
    ErrorWithoutFailure,

    #[error("Queue backend failure: {0}")]
    Backend(String),
}

/// Processor registry construction errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("There can be only one TaskProcessor instance registered as the processor for a given task type. {}", format_conflicts(.conflicts))]
    DuplicateProcessors { conflicts: Vec<ProcessorConflict> },
}

/// One task type claimed by more than one processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConflict {
    pub task_type: String,
    pub processors: Vec<String>,
}

fn format_conflicts(conflicts: &[ProcessorConflict]) -> String {
    conflicts
        .iter()
        .map(|c| {
            format!(
                "More than one TaskProcessor has task type '{}': [{}]",
                c.task_type,
                c.processors.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Raised by a [`TaskInterrupter`](crate::worker::TaskInterrupter) check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterruptError {
    #[error("Worker executing in '{execution}' has been interrupted")]
    Canceled { execution: String },

    #[error("Execution of task timed out after {} ms", .elapsed.as_millis())]
    TimedOut { elapsed: Duration },
}

/// Programmer or operator errors detected at call time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("Could not find the task being executed in execution '{execution}'")]
    NoTaskOnExecution { execution: String },

    #[error("No start time recorded for task {task_uuid}")]
    NoStartTime { task_uuid: Uuid },
}

/// Failure raised by a task initializer at submission time.
#[derive(Debug, thiserror::Error)]
#[error("{initializer}: {reason}")]
pub struct InitError {
    pub initializer: String,
    pub reason: String,
}

/// Failure of a task processor.
///
/// `Message` is meant for the end user (validation-style failure) and is
/// kept out of error-level logs. Everything else is an operational failure.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("{message}")]
    Message {
        error_type: Option<String>,
        message: String,
    },

    #[error(transparent)]
    Interrupted(#[from] InterruptError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProcessingError {
    /// Business error shown to the user as-is.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            error_type: None,
            message: message.into(),
        }
    }

    /// Business error carrying a machine-readable type.
    pub fn typed_message(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Message {
            error_type: Some(error_type.into()),
            message: message.into(),
        }
    }

    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::Message { .. })
    }

    /// Type persisted alongside the failure, if any.
    pub fn error_type(&self) -> Option<&str> {
        match self {
            Self::Message { error_type, .. } => error_type.as_deref(),
            Self::Interrupted(InterruptError::Canceled { .. }) => Some("canceled"),
            Self::Interrupted(InterruptError::TimedOut { .. }) => Some("timeout"),
            Self::Other(_) => None,
        }
    }
}

impl From<Error> for ProcessingError {
    fn from(err: Error) -> Self {
        match err {
            Error::Interrupt(e) => Self::Interrupted(e),
            other => Self::Other(anyhow::Error::new(other)),
        }
    }
}

/// Result type alias for the task pool.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fatal_is_fatal() {
        assert!(Error::Fatal("boom".into()).is_fatal());
        assert!(!Error::Queue(QueueError::Backend("db down".into())).is_fatal());
    }

    #[test]
    fn duplicate_processors_message_names_type_and_processors() {
        let err = RegistryError::DuplicateProcessors {
            conflicts: vec![ProcessorConflict {
                task_type: "REPORT".into(),
                processors: vec!["A".into(), "B".into()],
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains("'REPORT'"));
        assert!(msg.contains("[A, B]"));
    }

    #[test]
    fn processing_error_types() {
        assert!(ProcessingError::message("bad input").is_user_facing());
        assert!(!ProcessingError::Other(anyhow::anyhow!("npe")).is_user_facing());
        assert_eq!(
            ProcessingError::typed_message("quota", "too many").error_type(),
            Some("quota")
        );
        let timed_out = ProcessingError::from(InterruptError::TimedOut {
            elapsed: Duration::from_millis(1500),
        });
        assert_eq!(timed_out.error_type(), Some("timeout"));
        assert_eq!(timed_out.to_string(), "Execution of task timed out after 1500 ms");
    }
}
