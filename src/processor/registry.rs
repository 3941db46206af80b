//! Maps task types to the one processor responsible for them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{ProcessorConflict, RegistryError};
use crate::processor::TaskProcessor;
use crate::task::Task;

/// Immutable task-type → processor lookup.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn TaskProcessor>>,
}

impl ProcessorRegistry {
    /// Build the registry. Fails if two processors claim the same task type.
    pub fn new(processors: Vec<Arc<dyn TaskProcessor>>) -> Result<Self, RegistryError> {
        let mut owners: BTreeMap<String, Vec<Arc<dyn TaskProcessor>>> = BTreeMap::new();
        for processor in processors {
            for task_type in processor.handled_types() {
                owners.entry(task_type).or_default().push(Arc::clone(&processor));
            }
        }

        let conflicts: Vec<ProcessorConflict> = owners
            .iter()
            .filter(|(_, p)| p.len() > 1)
            .map(|(task_type, p)| ProcessorConflict {
                task_type: task_type.clone(),
                processors: p.iter().map(|p| p.name().to_string()).collect(),
            })
            .collect();
        if !conflicts.is_empty() {
            return Err(RegistryError::DuplicateProcessors { conflicts });
        }

        let processors = owners
            .into_iter()
            .filter_map(|(task_type, mut p)| p.pop().map(|p| (task_type, p)))
            .collect::<HashMap<_, _>>();
        tracing::debug!(types = processors.len(), "Task processor registry built");
        Ok(Self { processors })
    }

    /// Processor for the task's type, if one is registered.
    pub fn resolve(&self, task: &Task) -> Option<Arc<dyn TaskProcessor>> {
        self.processors.get(task.task_type()).cloned()
    }

    /// Registered task types.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.processors.keys().cloned().collect();
        types.sort();
        types
    }
}
