//! Taskpool — background task-processing runtime.

pub mod admin;
pub mod config;
pub mod error;
pub mod processor;
pub mod queue;
pub mod task;
pub mod worker;

#[cfg(test)]
mod test_support;
