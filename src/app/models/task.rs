//! Data models for import tasks
//!
//! An [`ImportTask`] is the durable record of one file import. It is mutated
//! only through its transition and checkpoint methods, which enforce the task
//! state machine and keep checkpoints strictly increasing.

use super::{ExamInfo, MergeStrategy, TableLayout};
use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// =============================================================================
// Task State Machine
// =============================================================================

/// Lifecycle states of an import task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Idle,
    Queued,
    Validating,
    Preparing,
    Processing,
    Paused,
    Resuming,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Legal successor states; anything not listed is rejected
    pub fn successors(self) -> &'static [TaskState] {
        use TaskState::*;
        match self {
            Idle => &[Queued, Validating],
            Queued => &[Validating, Cancelled],
            Validating => &[Preparing, Failed, Cancelled],
            Preparing => &[Processing, Failed, Cancelled],
            Processing => &[Paused, Completed, Failed, Cancelled],
            Paused => &[Resuming, Cancelled],
            Resuming => &[Processing, Failed],
            Failed => &[Validating],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        self.successors().contains(&next)
    }

    /// Completed and cancelled tasks never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled)
    }

    /// States in which a runner owns the task
    pub fn is_running(self) -> bool {
        matches!(
            self,
            TaskState::Validating
                | TaskState::Preparing
                | TaskState::Processing
                | TaskState::Resuming
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Idle => "IDLE",
            TaskState::Queued => "QUEUED",
            TaskState::Validating => "VALIDATING",
            TaskState::Preparing => "PREPARING",
            TaskState::Processing => "PROCESSING",
            TaskState::Paused => "PAUSED",
            TaskState::Resuming => "RESUMING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a task does with the records it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Resolve identities and write grade records
    GradeImport,
    /// Run every stage but commit nothing
    DryRun,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::GradeImport => f.write_str("grade_import"),
            TaskType::DryRun => f.write_str("dry_run"),
        }
    }
}

// =============================================================================
// Import Options
// =============================================================================

/// Per-task settings, snapshotted into the task when it is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub merge_strategy: MergeStrategy,
    pub max_retries: u32,

    /// Mint identities for students the store does not know
    pub create_missing_students: bool,

    /// Treat any recoverable record error as fatal for its batch
    pub strict_mode: bool,

    /// Operator-supplied layout, bypassing structure detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_override: Option<TableLayout>,

    /// Exam applied to rows without exam columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam: Option<ExamInfo>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            merge_strategy: MergeStrategy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            create_missing_students: true,
            strict_mode: false,
            layout_override: None,
            exam: None,
        }
    }
}

impl ImportOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn with_create_missing_students(mut self, create: bool) -> Self {
        self.create_missing_students = create;
        self
    }

    pub fn with_layout(mut self, layout: TableLayout) -> Self {
        self.layout_override = Some(layout);
        self
    }

    pub fn with_exam(mut self, exam: ExamInfo) -> Self {
        self.exam = Some(exam);
        self
    }
}

// =============================================================================
// Progress, Checkpoints, Errors
// =============================================================================

/// Counters for a task; `processed = successful + failed + skipped`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,

    /// Percentage of records processed, 0 to 100
    pub percentage: f64,

    /// Records per second since the task started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_rate: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_seconds_remaining: Option<u64>,
}

impl TaskProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Add one committed batch's counts
    pub fn record_batch(&mut self, successful: usize, failed: usize, skipped: usize) {
        self.successful += successful;
        self.failed += failed;
        self.skipped += skipped;
        self.processed = self.successful + self.failed + self.skipped;
    }

    /// Refresh percentage, rate, and ETA after counters change
    pub fn recalculate(&mut self, elapsed_seconds: f64) {
        self.percentage = if self.total == 0 {
            100.0
        } else {
            (self.processed as f64 / self.total as f64 * 100.0).min(100.0)
        };

        if elapsed_seconds > 0.0 && self.processed > 0 {
            let rate = self.processed as f64 / elapsed_seconds;
            self.processing_rate = Some(rate);
            self.estimated_seconds_remaining =
                Some((self.remaining() as f64 / rate).ceil() as u64);
        } else {
            self.processing_rate = None;
            self.estimated_seconds_remaining = None;
        }
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed)
    }

    /// Restore counters from a checkpoint
    pub fn restore(&mut self, checkpoint: &Checkpoint) {
        self.successful = checkpoint.success_count;
        self.failed = checkpoint.failed_count;
        self.skipped = checkpoint.skipped_count;
        self.processed = self.successful + self.failed + self.skipped;
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} processed ({:.1}%), {} ok, {} failed, {} skipped",
            self.processed, self.total, self.percentage, self.successful, self.failed, self.skipped
        )
    }
}

/// Durable marker written after each committed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: String,
    pub batch_index: usize,

    /// Index of the last source row in the committed batch
    pub last_processed_index: usize,

    /// Cumulative counters at commit time
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,

    pub timestamp: DateTime<Utc>,

    /// State needed to resume idempotently (layout, headers, minted ids)
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Category of a recorded error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Source,
    Structure,
    Validation,
    Identity,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn of(error: &Error) -> Self {
        match error {
            Error::Io { .. }
            | Error::CsvParsing { .. }
            | Error::Spreadsheet { .. }
            | Error::UnsupportedFormat { .. }
            | Error::FileNotFound { .. }
            | Error::DirectoryTraversal { .. } => ErrorKind::Source,
            Error::Structure { .. } => ErrorKind::Structure,
            Error::DataValidation { .. } => ErrorKind::Validation,
            Error::IdentityResolution { .. } => ErrorKind::Identity,
            Error::Storage { .. } | Error::Serialization { .. } => ErrorKind::Storage,
            _ => ErrorKind::Internal,
        }
    }
}

/// One itemized error kept on the task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedError {
    /// Source row index, absent for task-level failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    pub message: String,
    pub recoverable: bool,
    pub kind: ErrorKind,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl DetailedError {
    /// Itemize an error; the cells of a validation error become its context
    pub fn from_error(index: Option<usize>, error: &Error, timestamp: DateTime<Utc>) -> Self {
        let context = match error {
            Error::DataValidation { cells, .. } => cells.iter().cloned().collect(),
            _ => BTreeMap::new(),
        };
        Self {
            index,
            record_id: None,
            message: error.to_string(),
            recoverable: error.is_recoverable(),
            kind: ErrorKind::of(error),
            timestamp,
            context,
        }
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Import Task
// =============================================================================

/// Durable state of one import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportTask {
    pub id: String,
    pub task_type: TaskType,
    pub state: TaskState,
    pub source: PathBuf,
    pub options: ImportOptions,
    pub progress: TaskProgress,
    pub checkpoints: Vec<Checkpoint>,
    pub errors: Vec<DetailedError>,
    pub warnings: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub resumable: bool,
    pub can_retry: bool,
    pub retry_count: u32,

    /// Set when the task cannot proceed without an operator decision
    pub needs_user_input: bool,
    pub suggestions: Vec<String>,
}

impl ImportTask {
    pub fn new(
        id: impl Into<String>,
        task_type: TaskType,
        source: impl Into<PathBuf>,
        options: ImportOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            task_type,
            state: TaskState::Idle,
            source: source.into(),
            options,
            progress: TaskProgress::default(),
            checkpoints: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            paused_at: None,
            completed_at: None,
            resumable: false,
            can_retry: false,
            retry_count: 0,
            needs_user_input: false,
            suggestions: Vec::new(),
        }
    }

    /// Terminal tasks reject every mutation
    ///
    /// A failed task whose retry budget is spent is terminal too.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal() || (self.state == TaskState::Failed && !self.can_retry)
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::data_validation(format!(
                "Task {} is {} and can no longer change",
                self.id, self.state
            )));
        }
        Ok(())
    }

    /// Move to `next`, rejecting edges outside the transition table
    ///
    /// Leaving FAILED consumes one retry.
    pub fn transition(&mut self, next: TaskState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::invalid_transition(&self.id, self.state, next));
        }

        if self.state == TaskState::Failed {
            if self.retry_count >= self.options.max_retries {
                self.can_retry = false;
                return Err(Error::retry_limit_exceeded(&self.id, self.retry_count));
            }
            self.retry_count += 1;
            self.needs_user_input = false;
            self.suggestions.clear();
        }

        match next {
            TaskState::Validating if self.started_at.is_none() => self.started_at = Some(now),
            TaskState::Paused => self.paused_at = Some(now),
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed => {
                self.completed_at = Some(now)
            }
            TaskState::Resuming => self.paused_at = None,
            _ => {}
        }

        self.state = next;
        self.can_retry = next == TaskState::Failed && self.retry_count < self.options.max_retries;
        self.resumable = next == TaskState::Paused || self.can_retry;
        self.updated_at = now;
        Ok(())
    }

    pub fn last_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    /// First batch that has not been committed yet
    pub fn next_batch_index(&self) -> usize {
        self.last_checkpoint()
            .map(|checkpoint| checkpoint.batch_index + 1)
            .unwrap_or(0)
    }

    /// Append a checkpoint; batch indices must strictly increase
    pub fn record_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<()> {
        self.ensure_mutable()?;
        if let Some(last) = self.last_checkpoint() {
            if checkpoint.batch_index <= last.batch_index {
                return Err(Error::data_validation(format!(
                    "Checkpoint for batch {} does not follow batch {}",
                    checkpoint.batch_index, last.batch_index
                )));
            }
        }
        self.updated_at = checkpoint.timestamp;
        self.checkpoints.push(checkpoint);
        Ok(())
    }

    pub fn add_error(&mut self, error: DetailedError) -> Result<()> {
        self.ensure_mutable()?;
        self.updated_at = error.timestamp;
        self.errors.push(error);
        Ok(())
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) -> Result<()> {
        self.ensure_mutable()?;
        self.warnings.push(warning.into());
        Ok(())
    }

    /// Seconds between start and `now`, zero before the task starts
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        self.started_at
            .map(|started| (now - started).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

// =============================================================================
// Task Events
// =============================================================================

/// Event broadcast to task observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: TaskEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEventKind {
    State { from: TaskState, to: TaskState },
    Progress { progress: TaskProgress },
    Checkpoint { checkpoint: Checkpoint },
    Error { error: DetailedError },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> ImportTask {
        ImportTask::new(
            "task-1",
            TaskType::GradeImport,
            "scores.csv",
            ImportOptions::default(),
            Utc::now(),
        )
    }

    fn checkpoint(batch_index: usize) -> Checkpoint {
        Checkpoint {
            task_id: "task-1".to_string(),
            batch_index,
            last_processed_index: batch_index * 50 + 49,
            success_count: 0,
            failed_count: 0,
            skipped_count: 0,
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_transition_table_rejects_unlisted_edges() {
        let mut task = task();
        let now = Utc::now();
        assert!(task.transition(TaskState::Completed, now).is_err());
        assert_eq!(task.state, TaskState::Idle);

        task.transition(TaskState::Validating, now).unwrap();
        task.transition(TaskState::Preparing, now).unwrap();
        task.transition(TaskState::Processing, now).unwrap();
        assert!(task.transition(TaskState::Resuming, now).is_err());
        task.transition(TaskState::Completed, now).unwrap();

        assert!(task.is_terminal());
        for state in [TaskState::Validating, TaskState::Failed, TaskState::Cancelled] {
            assert!(task.transition(state, now).is_err());
        }
        assert!(task.add_warning("late").is_err());
    }

    #[test]
    fn test_resuming_cannot_be_cancelled_directly() {
        assert!(!TaskState::Resuming.can_transition_to(TaskState::Cancelled));
        assert!(TaskState::Paused.can_transition_to(TaskState::Cancelled));
        assert!(!TaskState::Idle.can_transition_to(TaskState::Cancelled));
    }

    #[test]
    fn test_retry_budget() {
        let mut task = task();
        let now = Utc::now();
        task.options.max_retries = 1;
        task.transition(TaskState::Validating, now).unwrap();
        task.transition(TaskState::Failed, now).unwrap();
        assert!(task.can_retry);
        assert!(task.resumable);

        task.transition(TaskState::Validating, now).unwrap();
        assert_eq!(task.retry_count, 1);
        task.transition(TaskState::Failed, now).unwrap();
        assert!(!task.can_retry);
        assert!(task.is_terminal());
        assert!(task.transition(TaskState::Validating, now).is_err());
    }

    #[test]
    fn test_checkpoints_strictly_increase() {
        let mut task = task();
        task.record_checkpoint(checkpoint(0)).unwrap();
        task.record_checkpoint(checkpoint(1)).unwrap();
        assert!(task.record_checkpoint(checkpoint(1)).is_err());
        assert_eq!(task.next_batch_index(), 2);
        assert_eq!(task.last_checkpoint().unwrap().batch_index, 1);
    }

    #[test]
    fn test_progress_recalculate() {
        let mut progress = TaskProgress::new(200);
        progress.record_batch(40, 5, 5);
        progress.recalculate(10.0);
        assert_eq!(progress.processed, 50);
        assert_eq!(progress.percentage, 25.0);
        assert_eq!(progress.processing_rate, Some(5.0));
        assert_eq!(progress.estimated_seconds_remaining, Some(30));
    }

    #[test]
    fn test_state_serializes_uppercase() {
        let json = serde_json::to_string(&TaskState::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
    }
}
