//! Task processors and their registry.

pub mod registry;
pub mod sleep;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::ProcessingError;
use crate::task::{Task, TaskResult};
use crate::worker::ExecutionContext;

pub use registry::ProcessorRegistry;
pub use sleep::SleepProcessor;

/// Business logic for one or more task types.
///
/// Long-running implementations should call
/// [`TaskInterrupter::check`](crate::worker::TaskInterrupter::check) with the
/// given context at natural checkpoints.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Identifier used in diagnostics.
    fn name(&self) -> &str;

    /// Task types this processor handles.
    fn handled_types(&self) -> BTreeSet<String>;

    async fn process(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
    ) -> Result<Option<TaskResult>, ProcessingError>;
}
