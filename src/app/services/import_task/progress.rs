//! Terminal progress bars fed by task events

use crate::app::models::task::{TaskEvent, TaskEventKind, TaskState};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

/// One progress bar per task, driven by the runner's event stream
pub struct ProgressReporter {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    labels: HashMap<String, String>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    /// Reporter that draws nothing, for quiet and JSON output
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
            bars: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    /// Name shown in front of a task's bar, usually the file name
    pub fn label(&mut self, task_id: impl Into<String>, label: impl Into<String>) {
        self.labels.insert(task_id.into(), label.into());
    }

    /// Apply one event to the bars
    pub fn handle(&mut self, event: &TaskEvent) {
        match &event.kind {
            TaskEventKind::Progress { progress } => {
                let bar = self.bar(&event.task_id);
                bar.set_length(progress.total as u64);
                bar.set_position(progress.processed as u64);
                bar.set_message(progress.summary());
            }
            TaskEventKind::State { to, .. } => {
                let bar = self.bar(&event.task_id);
                match to {
                    TaskState::Completed => bar.finish_with_message("completed"),
                    TaskState::Paused => bar.abandon_with_message("paused"),
                    TaskState::Failed => bar.abandon_with_message("failed"),
                    TaskState::Cancelled => bar.abandon_with_message("cancelled"),
                    state => bar.set_message(state.as_str().to_lowercase()),
                }
            }
            TaskEventKind::Checkpoint { .. } | TaskEventKind::Error { .. } => {}
        }
    }

    /// Consume events until the runner drops its sender
    pub async fn run(mut self, mut events: broadcast::Receiver<TaskEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle(&event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Progress reporter skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.finish_and_clear();
            }
        }
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    /// Position of a task's bar, if it has one
    pub fn position(&self, task_id: &str) -> Option<u64> {
        self.bars.get(task_id).map(ProgressBar::position)
    }

    fn bar(&mut self, task_id: &str) -> &ProgressBar {
        if !self.bars.contains_key(task_id) {
            let bar = self.multi.add(ProgressBar::new(0));
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{prefix:.bold} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows | {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▉▊▋▌▍▎▏  "),
            );
            let prefix = self
                .labels
                .get(task_id)
                .cloned()
                .unwrap_or_else(|| task_id.chars().take(8).collect());
            bar.set_prefix(prefix);
            self.bars.insert(task_id.to_string(), bar);
        }
        &self.bars[task_id]
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
