//! Built-in processor that simulates work.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::ProcessingError;
use crate::processor::TaskProcessor;
use crate::task::{Task, TaskResult};
use crate::worker::{ExecutionContext, TaskInterrupter};

pub const SLEEP_TASK_TYPE: &str = "SLEEP";

/// Characteristic holding the sleep duration in milliseconds.
pub const DURATION_MS: &str = "durationMs";

const DEFAULT_DURATION: Duration = Duration::from_millis(1000);
const STEP: Duration = Duration::from_millis(100);

/// Sleeps for `durationMs`, checking for interruption every 100 ms.
pub struct SleepProcessor {
    interrupter: Arc<dyn TaskInterrupter>,
}

impl SleepProcessor {
    pub fn new(interrupter: Arc<dyn TaskInterrupter>) -> Self {
        Self { interrupter }
    }
}

#[async_trait]
impl TaskProcessor for SleepProcessor {
    fn name(&self) -> &str {
        "sleep"
    }

    fn handled_types(&self) -> BTreeSet<String> {
        BTreeSet::from([SLEEP_TASK_TYPE.to_string()])
    }

    async fn process(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
    ) -> Result<Option<TaskResult>, ProcessingError> {
        let duration = match task.characteristics().get(DURATION_MS) {
            None => DEFAULT_DURATION,
            Some(raw) => raw.trim().parse().map(Duration::from_millis).map_err(|_| {
                ProcessingError::typed_message(
                    "invalid_characteristic",
                    format!("{DURATION_MS} must be a number of milliseconds. Got '{raw}'"),
                )
            })?,
        };

        let deadline = Instant::now() + duration;
        loop {
            self.interrupter.check(ctx)?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::time::sleep(remaining.min(STEP)).await;
        }
    }
}
