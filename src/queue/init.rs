//! Initializers run, in order, on every task submission.

use std::sync::Arc;

use crate::error::InitError;
use crate::queue::TaskSubmit;

/// Extension invoked before a task is enqueued. May enrich the submission.
pub trait TaskInitializer: Send + Sync {
    fn name(&self) -> &str;

    fn on_init(&self, submit: &mut TaskSubmit) -> Result<(), InitError>;
}

/// Ordered initializers. The first failure stops the chain.
#[derive(Clone, Default)]
pub struct InitializationChain {
    initializers: Vec<Arc<dyn TaskInitializer>>,
}

impl InitializationChain {
    pub fn new(initializers: Vec<Arc<dyn TaskInitializer>>) -> Self {
        Self { initializers }
    }

    pub fn len(&self) -> usize {
        self.initializers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.initializers.is_empty()
    }

    pub fn run(&self, submit: &mut TaskSubmit) -> Result<(), InitError> {
        for initializer in &self.initializers {
            tracing::debug!(initializer = initializer.name(), "Running task initializer");
            initializer.on_init(submit)?;
        }
        Ok(())
    }
}
