//! Configuration types.
//!
//! Settings are read through a [`ConfigSource`] on every access so that
//! `workerCount` can be changed while the engine runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::error::ConfigError;

pub const WORKER_COUNT: &str = "workerCount";
pub const QUEUE_POLLING_DELAY: &str = "queuePollingDelay";
pub const EXTENDED_DELAY: &str = "extendedDelay";
pub const TASK_TIMEOUT_SECONDS: &str = "taskTimeoutSeconds";
pub const ADMIN_PORT: &str = "adminPort";

const DEFAULT_WORKER_COUNT: i32 = 1;
const DEFAULT_QUEUE_POLLING_DELAY: Duration = Duration::from_millis(2000);
const DEFAULT_EXTENDED_DELAY: Duration = Duration::from_millis(30_000);

/// A live key/value settings provider.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads settings from `TASKPOOL_*` environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl EnvSource {
    fn var_name(key: &str) -> Option<&'static str> {
        match key {
            WORKER_COUNT => Some("TASKPOOL_WORKER_COUNT"),
            QUEUE_POLLING_DELAY => Some("TASKPOOL_QUEUE_POLLING_DELAY_MS"),
            EXTENDED_DELAY => Some("TASKPOOL_EXTENDED_DELAY_MS"),
            TASK_TIMEOUT_SECONDS => Some("TASKPOOL_TASK_TIMEOUT_SECONDS"),
            ADMIN_PORT => Some("TASKPOOL_ADMIN_PORT"),
            _ => None,
        }
    }
}

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        Self::var_name(key).and_then(|name| std::env::var(name).ok())
    }
}

/// In-memory settings, mutable at runtime.
#[derive(Debug, Default)]
pub struct MemorySource {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: &str, value: impl ToString) {
        self.values.write().insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

impl ConfigSource for MemorySource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}

/// Engine settings view.
///
/// Delays are captured once at construction. The worker count is re-read
/// from the source on every call.
#[derive(Clone)]
pub struct EngineConfig {
    source: Arc<dyn ConfigSource>,
    queue_polling_delay: Duration,
    extended_delay: Duration,
    /// Last rejected `workerCount`, so each bad value is reported once.
    rejected_worker_count: Arc<Mutex<Option<String>>>,
}

impl EngineConfig {
    pub fn new(source: Arc<dyn ConfigSource>) -> Result<Self, ConfigError> {
        let queue_polling_delay =
            read_millis(source.as_ref(), QUEUE_POLLING_DELAY)?.unwrap_or(DEFAULT_QUEUE_POLLING_DELAY);
        let extended_delay =
            read_millis(source.as_ref(), EXTENDED_DELAY)?.unwrap_or(DEFAULT_EXTENDED_DELAY);
        Ok(Self {
            source,
            queue_polling_delay,
            extended_delay,
            rejected_worker_count: Arc::new(Mutex::new(None)),
        })
    }

    /// Configuration backed by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(Arc::new(EnvSource))
    }

    /// Number of workers, read live. Missing or invalid values fall back to 1.
    pub fn worker_count(&self) -> i32 {
        let Some(raw) = self.source.get(WORKER_COUNT) else {
            return DEFAULT_WORKER_COUNT;
        };
        match raw.trim().parse::<i32>() {
            Ok(count) if count >= 1 => {
                self.rejected_worker_count.lock().take();
                count
            }
            _ => {
                let mut rejected = self.rejected_worker_count.lock();
                if rejected.as_deref() != Some(raw.as_str()) {
                    tracing::warn!(
                        value = %raw,
                        "Invalid value for {}, using {}",
                        WORKER_COUNT,
                        DEFAULT_WORKER_COUNT
                    );
                    *rejected = Some(raw);
                }
                DEFAULT_WORKER_COUNT
            }
        }
    }

    /// Delay before the next poll after an empty queue.
    pub fn queue_polling_delay(&self) -> Duration {
        self.queue_polling_delay
    }

    /// Delay before the next poll of a disabled worker.
    pub fn extended_delay(&self) -> Duration {
        self.extended_delay
    }

    /// Task timeout, if enforced. Must be a whole number of seconds ≥ 1.
    pub fn task_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        let Some(raw) = self.source.get(TASK_TIMEOUT_SECONDS) else {
            return Ok(None);
        };
        match raw.trim().parse::<u64>() {
            Ok(secs) if secs >= 1 => Ok(Some(Duration::from_secs(secs))),
            _ => Err(ConfigError::InvalidValue {
                key: TASK_TIMEOUT_SECONDS.to_string(),
                message: format!("must be a long value >= 1. Got '{raw}'"),
            }),
        }
    }

    /// Port of the admin HTTP endpoint (default 9001).
    pub fn admin_port(&self) -> Result<u16, ConfigError> {
        match self.source.get(ADMIN_PORT) {
            None => Ok(9001),
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ADMIN_PORT.to_string(),
                message: format!("not a port number: '{raw}'"),
            }),
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("queue_polling_delay", &self.queue_polling_delay)
            .field("extended_delay", &self.extended_delay)
            .finish_non_exhaustive()
    }
}

fn read_millis(source: &dyn ConfigSource, key: &str) -> Result<Option<Duration>, ConfigError> {
    match source.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}' is not a number of milliseconds: {e}"),
            }),
    }
}
