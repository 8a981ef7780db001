//! Resumable import tasks
//!
//! An import reads one source file, settles its header mapping and layout,
//! and then commits its rows in fixed-size batches. After every committed
//! batch a checkpoint is written, so a paused, crashed, or failed task picks
//! up after the last batch that reached the grade store.
//!
//! ## Architecture
//!
//! - [`planning`] - Header analysis, remembered mappings, the mapping assistant, and layout detection
//! - [`runner`] - State machine driver that processes, checkpoints, and persists batches
//! - [`control`] - Pause and cancel handles checked between batches
//! - [`progress`] - Progress bars fed by the runner's event stream
//!
//! Task state moves along the edges of [`TaskState::successors`]; every edge
//! is persisted and broadcast as a [`TaskEvent`].
//!
//! [`TaskState::successors`]: crate::app::models::task::TaskState::successors
//! [`TaskEvent`]: crate::app::models::task::TaskEvent

pub mod control;
pub mod planning;
pub mod progress;
pub mod runner;

#[cfg(test)]
pub mod tests;

// Re-export main types for easy access
pub use control::TaskControl;
pub use planning::{ImportPlan, ImportPlanner};
pub use progress::ProgressReporter;
pub use runner::{ImportRunner, ResumePayload};
