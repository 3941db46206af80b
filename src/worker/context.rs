//! Execution handles passed to workers and processors.
//!
//! An [`ExecutionContext`] stands in for the executing thread: the worker
//! registers it with the controller, and processors hand it back to the
//! interrupter. Interruption is cooperative and observed through a
//! cancellation token.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Stable identifier of one execution lane (one scheduler chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionId(u64);

impl ExecutionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ce-exec-{}", self.0)
    }
}

/// Handle for one poll cycle.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    id: ExecutionId,
    token: CancellationToken,
}

impl ExecutionContext {
    /// Standalone context with a fresh id.
    pub fn new() -> Self {
        Self {
            id: ExecutionId::next(),
            token: CancellationToken::new(),
        }
    }

    /// Context on lane `id` that is interrupted whenever `parent` is cancelled.
    /// Interrupting the context itself leaves `parent` untouched.
    pub fn child_of(id: ExecutionId, parent: &CancellationToken) -> Self {
        Self {
            id,
            token: parent.child_token(),
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// Ask the code running under this context to stop.
    pub fn interrupt(&self) {
        self.token.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is interrupted.
    pub async fn interrupted(&self) {
        self.token.cancelled().await;
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(ExecutionId::next(), ExecutionId::next());
        assert_ne!(ExecutionContext::new().id(), ExecutionContext::new().id());
    }

    #[test]
    fn interrupting_child_does_not_touch_parent() {
        let parent = CancellationToken::new();
        let id = ExecutionId::next();
        let first = ExecutionContext::child_of(id, &parent);
        first.interrupt();
        assert!(first.is_interrupted());
        assert!(!parent.is_cancelled());

        let second = ExecutionContext::child_of(id, &parent);
        assert!(!second.is_interrupted());
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn parent_cancel_interrupts_child() {
        let parent = CancellationToken::new();
        let ctx = ExecutionContext::child_of(ExecutionId::next(), &parent);
        parent.cancel();
        assert!(ctx.is_interrupted());
    }
}
