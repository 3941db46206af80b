//! Shared test helpers: scripted processors and log capture.

use std::collections::BTreeSet;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::error::ProcessingError;
use crate::processor::TaskProcessor;
use crate::task::{Task, TaskResult};
use crate::worker::ExecutionContext;

pub enum ProcessBehavior {
    Succeed,
    /// Operational failure.
    Fail(&'static str),
    /// User-facing failure.
    Reject(&'static str),
    Panic,
}

pub struct MockProcessor {
    task_type: String,
    behavior: ProcessBehavior,
    calls: AtomicUsize,
}

impl MockProcessor {
    pub fn new(task_type: &str, behavior: ProcessBehavior) -> Arc<Self> {
        Arc::new(Self {
            task_type: task_type.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskProcessor for MockProcessor {
    fn name(&self) -> &str {
        "mock"
    }

    fn handled_types(&self) -> BTreeSet<String> {
        BTreeSet::from([self.task_type.clone()])
    }

    async fn process(
        &self,
        _task: &Task,
        _ctx: &ExecutionContext,
    ) -> Result<Option<TaskResult>, ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ProcessBehavior::Succeed => Ok(Some(TaskResult {
                analysis_uuid: Some("analysis-1".to_string()),
            })),
            ProcessBehavior::Fail(msg) => Err(anyhow::anyhow!(msg).into()),
            ProcessBehavior::Reject(msg) => Err(ProcessingError::message(msg)),
            ProcessBehavior::Panic => panic!("processor exploded"),
        }
    }
}

type Records = Arc<Mutex<Vec<(Level, String)>>>;

/// Collects log events emitted on the current thread while alive.
pub struct LogCapture {
    records: Records,
    _guard: DefaultGuard,
}

impl LogCapture {
    pub fn install() -> Self {
        let records = Records::default();
        let subscriber = tracing_subscriber::registry().with(CaptureLayer(records.clone()));
        let guard = tracing::subscriber::set_default(subscriber);
        Self {
            records,
            _guard: guard,
        }
    }

    /// Error-level lines, as `message key=value ...`.
    pub fn errors(&self) -> Vec<String> {
        self.lines(Level::ERROR)
    }

    pub fn error_count(&self) -> usize {
        self.errors().len()
    }

    pub fn warn_count(&self) -> usize {
        self.lines(Level::WARN).len()
    }

    pub fn contains_info(&self, needle: &str) -> bool {
        self.lines(Level::INFO).iter().any(|l| l.contains(needle))
    }

    fn lines(&self, level: Level) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

struct CaptureLayer(Records);

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = LineVisitor::default();
        event.record(&mut line);
        self.0
            .lock()
            .push((*event.metadata().level(), line.message + &line.fields));
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
