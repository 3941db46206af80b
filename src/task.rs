//! Task model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A component the task operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub uuid: String,
    pub key: Option<String>,
    pub name: Option<String>,
}

impl Component {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            key: None,
            name: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Who submitted a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitter {
    pub uuid: String,
    pub login: Option<String>,
}

impl fmt::Display for Submitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.login {
            Some(login) => write!(f, "{login}"),
            None => write!(f, "{}", self.uuid),
        }
    }
}

/// One unit of queued work. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    uuid: Uuid,
    task_type: String,
    component: Option<Component>,
    main_component: Option<Component>,
    submitter: Option<Submitter>,
    characteristics: BTreeMap<String, String>,
}

impl Task {
    pub fn builder(task_type: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(task_type)
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn component(&self) -> Option<&Component> {
        self.component.as_ref()
    }

    pub fn main_component(&self) -> Option<&Component> {
        self.main_component.as_ref()
    }

    pub fn submitter(&self) -> Option<&Submitter> {
        self.submitter.as_ref()
    }

    pub fn characteristics(&self) -> &BTreeMap<String, String> {
        &self.characteristics
    }
}

/// Builder for [`Task`].
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    uuid: Option<Uuid>,
    task_type: String,
    component: Option<Component>,
    main_component: Option<Component>,
    submitter: Option<Submitter>,
    characteristics: BTreeMap<String, String>,
}

impl TaskBuilder {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            uuid: None,
            task_type: task_type.into(),
            component: None,
            main_component: None,
            submitter: None,
            characteristics: BTreeMap::new(),
        }
    }

    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn component(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }

    pub fn main_component(mut self, component: Component) -> Self {
        self.main_component = Some(component);
        self
    }

    pub fn submitter(mut self, uuid: impl Into<String>, login: Option<String>) -> Self {
        self.submitter = Some(Submitter {
            uuid: uuid.into(),
            login,
        });
        self
    }

    pub fn characteristic(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.characteristics.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Task {
        Task {
            uuid: self.uuid.unwrap_or_else(Uuid::new_v4),
            task_type: self.task_type,
            component: self.component,
            main_component: self.main_component,
            submitter: self.submitter,
            characteristics: self.characteristics,
        }
    }
}

/// Optional output of a processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub analysis_uuid: Option<String>,
}

/// Outcome recorded when a task leaves the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
    /// Removed before execution. Never produced by a worker.
    Canceled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        };
        write!(f, "{s}")
    }
}

/// Coarse result of one worker poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollResult {
    NoTask,
    TaskProcessed,
    Disabled,
}
