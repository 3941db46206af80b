//! Hooks fired around every task a worker picks up.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, ProcessingError};
use crate::task::{ExecutionStatus, Task};
use crate::worker::interrupter::TaskInterrupter;

/// Called, in registration order, when a worker starts and ends a task.
///
/// `on_end` runs whatever happened during processing and finalization.
/// An error from a listener is a bug in the listener and propagates out of
/// the poll.
pub trait ExecutionListener: Send + Sync {
    fn on_start(&self, task: &Task) -> Result<(), Error>;

    fn on_end(
        &self,
        task: &Task,
        status: ExecutionStatus,
        duration: Duration,
        error: Option<&ProcessingError>,
    ) -> Result<(), Error>;
}

/// Feeds task start/end to the interrupter so it can track run times.
pub struct InterrupterListener {
    interrupter: Arc<dyn TaskInterrupter>,
}

impl InterrupterListener {
    pub fn new(interrupter: Arc<dyn TaskInterrupter>) -> Self {
        Self { interrupter }
    }
}

impl ExecutionListener for InterrupterListener {
    fn on_start(&self, task: &Task) -> Result<(), Error> {
        self.interrupter.on_start(task);
        Ok(())
    }

    fn on_end(
        &self,
        task: &Task,
        _status: ExecutionStatus,
        _duration: Duration,
        _error: Option<&ProcessingError>,
    ) -> Result<(), Error> {
        self.interrupter.on_end(task);
        Ok(())
    }
}
