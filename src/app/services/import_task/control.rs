//! Pause and cancel handles for a running task

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Shared handle checked by the runner between batches
///
/// Clones share state, so the handle given to the runner can be paused or
/// cancelled from a signal handler or another task.
#[derive(Debug, Clone, Default)]
pub struct TaskControl {
    pause: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Control whose cancellation follows a parent token
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            pause: Arc::new(AtomicBool::new(false)),
            cancel: parent.child_token(),
        }
    }

    /// Ask the runner to pause at the next batch boundary
    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn clear_pause(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Ask the runner to cancel at the next batch boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
