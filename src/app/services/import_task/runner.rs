//! Drives import tasks through validation, batch processing, and completion

use super::control::TaskControl;
use super::planning::{ImportPlan, ImportPlanner};
use crate::app::adapters::stores::{GradeStore, IdentityStore, PendingWrite, TaskStore, WriteMode};
use crate::app::models::task::{
    Checkpoint, DetailedError, ImportOptions, ImportTask, TaskEvent, TaskEventKind, TaskProgress,
    TaskState, TaskType,
};
use crate::app::models::{
    ExamInfo, MergeStrategy, RawRecord, RecordKey, StudentIdentity, TableLayout,
};
use crate::app::services::identity_resolver::{IdentityResolver, merge_record};
use crate::app::services::record_transformer::RecordTransformer;
use crate::app::services::source_reader::{SourceTable, read_source_async};
use crate::config::{Config, IdentityConfig, ImportConfig};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events buffered per subscriber before slow subscribers start lagging
const EVENT_CAPACITY: usize = 1024;

/// State stored in every checkpoint so a resumed task reads the file the
/// same way and hands out the same minted identities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<TableLayout>,

    #[serde(default)]
    pub headers: Vec<String>,

    /// Identities created by the task, keyed as the resolver memo keys them
    #[serde(default)]
    pub identities: BTreeMap<String, StudentIdentity>,
}

impl ResumePayload {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self> {
        if checkpoint.payload.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(checkpoint.payload.clone())?)
    }
}

/// Output of the validation stage
struct Validated {
    plan: ImportPlan,
    table: SourceTable,
    layout: TableLayout,
    payload: ResumePayload,
}

/// Per-run state shared by every batch
struct BatchContext {
    headers: Vec<String>,
    exam: ExamInfo,
    transformer: RecordTransformer,
    resolver: IdentityResolver,
    strategy: MergeStrategy,
    strict: bool,
}

enum RowResult {
    Imported,
    Skipped,
}

/// Counts, writes, and itemized problems of one batch before commit
#[derive(Default)]
struct BatchOutcome {
    successful: usize,
    failed: usize,
    skipped: usize,
    last_index: usize,
    writes: Vec<PendingWrite>,
    pending: HashMap<RecordKey, usize>,
    errors: Vec<DetailedError>,
    warnings: Vec<String>,
}

impl BatchOutcome {
    /// Stored record for a key, seeing writes queued earlier in this batch
    async fn existing(
        &self,
        grades: &dyn GradeStore,
        key: &RecordKey,
    ) -> Result<Option<crate::LongFormGradeRecord>> {
        match self.pending.get(key) {
            Some(&index) => Ok(Some(self.writes[index].record.clone())),
            None => grades.find_existing(key).await,
        }
    }

    fn queue(&mut self, key: RecordKey, write: PendingWrite) {
        match self.pending.get(&key) {
            Some(&index) if write.mode == WriteMode::Upsert => self.writes[index] = write,
            _ => {
                self.pending.insert(key, self.writes.len());
                self.writes.push(write);
            }
        }
    }
}

/// Runs import tasks against a set of stores
///
/// Batches of one task run strictly in order: write, checkpoint, progress,
/// persist. Several tasks may run at once on a shared runner; each keeps its
/// own identity memo.
pub struct ImportRunner {
    identities: Arc<dyn IdentityStore>,
    grades: Arc<dyn GradeStore>,
    tasks: Arc<dyn TaskStore>,
    planner: ImportPlanner,
    import: ImportConfig,
    identity: IdentityConfig,
    events: broadcast::Sender<TaskEvent>,
}

impl ImportRunner {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        grades: Arc<dyn GradeStore>,
        tasks: Arc<dyn TaskStore>,
        config: &Config,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            identities,
            grades,
            tasks,
            planner: ImportPlanner::new(&config.mapping),
            import: config.import.clone(),
            identity: config.identity.clone(),
            events,
        }
    }

    /// Runner whose three stores are one object
    pub fn with_store<S>(store: Arc<S>, config: &Config) -> Self
    where
        S: IdentityStore + GradeStore + TaskStore + 'static,
    {
        Self::new(store.clone(), store.clone(), store, config)
    }

    pub fn with_planner(mut self, planner: ImportPlanner) -> Self {
        self.planner = planner;
        self
    }

    /// Receive state, progress, checkpoint, and error events of every task
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub async fn create_task(
        &self,
        source: impl Into<PathBuf>,
        options: ImportOptions,
        task_type: TaskType,
    ) -> Result<ImportTask> {
        let task = ImportTask::new(
            Uuid::new_v4().to_string(),
            task_type,
            source,
            options,
            Utc::now(),
        );
        self.tasks.save_task(&task).await?;
        info!("Created task {} for {}", task.id, task.source.display());
        Ok(task)
    }

    pub async fn status(&self, task_id: &str) -> Result<ImportTask> {
        self.tasks
            .load_task(task_id)
            .await?
            .ok_or_else(|| Error::task_not_found(task_id))
    }

    pub async fn list(&self) -> Result<Vec<ImportTask>> {
        self.tasks.list_tasks().await
    }

    /// Mark an idle task as waiting for a free slot
    pub async fn enqueue(&self, task_id: &str) -> Result<ImportTask> {
        let mut task = self.status(task_id).await?;
        self.transition(&mut task, TaskState::Queued).await?;
        Ok(task)
    }

    /// Run an idle or queued task from the first row
    pub async fn start(&self, task_id: &str, control: &TaskControl) -> Result<ImportTask> {
        let mut task = self.status(task_id).await?;
        self.transition(&mut task, TaskState::Validating).await?;
        self.run(task, control).await
    }

    /// Continue a paused task after its last checkpoint
    ///
    /// A task left in PROCESSING by a process that died is treated as paused.
    /// One left in an earlier running state is failed and retried. Tasks that
    /// never started are started.
    pub async fn resume(&self, task_id: &str, control: &TaskControl) -> Result<ImportTask> {
        let mut task = self.status(task_id).await?;
        match task.state {
            TaskState::Paused => {}
            TaskState::Idle | TaskState::Queued => return self.start(task_id, control).await,
            TaskState::Processing => {
                warn!(
                    "Task {} was left in PROCESSING; resuming after its last checkpoint",
                    task.id
                );
                self.transition(&mut task, TaskState::Paused).await?;
            }
            TaskState::Validating | TaskState::Preparing | TaskState::Resuming => {
                warn!("Task {} was left in {}; retrying", task.id, task.state);
                let reason = format!("Task was interrupted while {}", task.state);
                self.fail(&mut task, Error::processing_interrupted(reason))
                    .await?;
                return self.retry(task_id, control).await;
            }
            TaskState::Failed => return self.retry(task_id, control).await,
            state => {
                return Err(Error::invalid_transition(
                    &task.id,
                    state,
                    TaskState::Resuming,
                ));
            }
        }

        control.clear_pause();
        self.transition(&mut task, TaskState::Resuming).await?;
        self.run(task, control).await
    }

    /// Retry a failed task; committed batches are not redone
    pub async fn retry(&self, task_id: &str, control: &TaskControl) -> Result<ImportTask> {
        let mut task = self.status(task_id).await?;
        if task.state != TaskState::Failed {
            return Err(Error::invalid_transition(
                &task.id,
                task.state,
                TaskState::Validating,
            ));
        }
        if let Err(error) = self.transition(&mut task, TaskState::Validating).await {
            // Persist the spent retry budget
            self.tasks.save_task(&task).await?;
            return Err(error);
        }
        control.clear_pause();
        self.run(task, control).await
    }

    /// Set the operator layout of a task before it is retried or started
    pub async fn set_layout(&self, task_id: &str, layout: TableLayout) -> Result<ImportTask> {
        let mut task = self.status(task_id).await?;
        if task.state.is_running() || task.is_terminal() {
            return Err(Error::configuration(format!(
                "Task {} is {}; its layout can no longer change",
                task.id, task.state
            )));
        }
        task.options.layout_override = Some(layout);
        task.updated_at = Utc::now();
        self.tasks.save_task(&task).await?;
        info!("Task {} will be read with the {} layout", task.id, layout);
        Ok(task)
    }

    /// Cancel a task that is not running in this process
    ///
    /// Running tasks are cancelled through their [`TaskControl`].
    pub async fn cancel(&self, task_id: &str) -> Result<ImportTask> {
        let mut task = self.status(task_id).await?;
        self.transition(&mut task, TaskState::Cancelled).await?;
        info!("Cancelled task {}", task.id);
        Ok(task)
    }

    async fn run(&self, mut task: ImportTask, control: &TaskControl) -> Result<ImportTask> {
        let validated = match self.validate(&task).await {
            Ok(validated) => validated,
            Err(error) => {
                self.fail(&mut task, error).await?;
                return Ok(task);
            }
        };
        for warning in &validated.plan.warnings {
            push_warning(&mut task, warning)?;
        }

        if task.state == TaskState::Validating {
            self.transition(&mut task, TaskState::Preparing).await?;
        }
        let Validated {
            plan,
            table,
            layout,
            payload,
        } = validated;
        let mut context = self.prepare(&task, &plan, layout, payload);

        task.progress = TaskProgress::new(table.row_count());
        if let Some(checkpoint) = task.last_checkpoint().cloned() {
            task.progress.restore(&checkpoint);
        }
        task.progress.recalculate(task.elapsed_seconds(Utc::now()));
        self.transition(&mut task, TaskState::Processing).await?;

        let first_batch = task.next_batch_index();
        let batch_size = task.options.batch_size.max(1);
        if first_batch > 0 {
            info!(
                "Task {} continuing at batch {} ({})",
                task.id,
                first_batch,
                task.progress.summary()
            );
        }

        for (batch_index, rows) in table.rows.chunks(batch_size).enumerate().skip(first_batch) {
            if control.is_cancelled() {
                self.transition(&mut task, TaskState::Cancelled).await?;
                info!("Task {} cancelled before batch {}", task.id, batch_index);
                return Ok(task);
            }
            if control.is_pause_requested() {
                self.transition(&mut task, TaskState::Paused).await?;
                info!("Task {} paused before batch {}", task.id, batch_index);
                return Ok(task);
            }

            let outcome = match self.process_batch(&mut context, rows).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    self.fail(&mut task, error).await?;
                    return Ok(task);
                }
            };
            if let Err(error) = self.commit(&mut task, &context, batch_index, outcome).await {
                self.fail(&mut task, error).await?;
                return Ok(task);
            }
        }

        self.transition(&mut task, TaskState::Completed).await?;
        if task.task_type == TaskType::GradeImport {
            self.planner.confirm(&plan);
        }
        info!("Task {} completed: {}", task.id, task.progress.summary());
        Ok(task)
    }

    /// Read the source and settle how its rows will be read
    async fn validate(&self, task: &ImportTask) -> Result<Validated> {
        let table = read_source_async(&task.source).await?;
        let plan = self.planner.plan(&task.source, &table, &task.options).await;

        let payload = task
            .last_checkpoint()
            .map(ResumePayload::from_checkpoint)
            .transpose()?
            .unwrap_or_default();
        if !payload.headers.is_empty() && payload.headers != table.headers {
            return Err(Error::structure(
                format!(
                    "Headers of {} changed since the last checkpoint",
                    task.source.display()
                ),
                vec!["Start a new import for the changed file".to_string()],
            ));
        }

        if !plan.has_identity_columns() {
            return Err(Error::structure(
                "No student name or student id column was found",
                vec!["Add or rename a 姓名 or 学号 column and retry".to_string()],
            ));
        }

        let layout = payload.layout.unwrap_or_else(|| plan.layout());
        if layout == TableLayout::Mixed {
            let mut suggestions = plan.structure.suggestions.clone();
            suggestions.extend(plan.suggestions.iter().cloned());
            return Err(Error::structure(
                format!(
                    "Cannot tell whether {} is wide or long",
                    task.source.display()
                ),
                suggestions,
            ));
        }

        Ok(Validated {
            plan,
            table,
            layout,
            payload,
        })
    }

    fn prepare(
        &self,
        task: &ImportTask,
        plan: &ImportPlan,
        layout: TableLayout,
        payload: ResumePayload,
    ) -> BatchContext {
        let mut resolver = IdentityResolver::new(self.identities.clone(), self.identity.clone())
            .with_create_missing(task.options.create_missing_students);
        if !payload.identities.is_empty() {
            debug!(
                "Restored {} minted identities for task {}",
                payload.identities.len(),
                task.id
            );
            resolver.import_memo(payload.identities);
        }

        BatchContext {
            headers: plan.headers.clone(),
            exam: plan.exam.clone(),
            transformer: RecordTransformer::new(&plan.analysis, layout, &self.import),
            resolver,
            strategy: task.options.merge_strategy,
            strict: task.options.strict_mode,
        }
    }

    /// Transform, resolve, and merge every row of a batch
    ///
    /// Recoverable row errors are collected; in strict mode the first one
    /// fails the batch.
    async fn process_batch(
        &self,
        context: &mut BatchContext,
        rows: &[RawRecord],
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let now = Utc::now();

        for row in rows {
            outcome.last_index = row.index;
            match self.process_row(context, row, &mut outcome, now).await {
                Ok(RowResult::Imported) => outcome.successful += 1,
                Ok(RowResult::Skipped) => outcome.skipped += 1,
                Err(error) if error.is_recoverable() => {
                    if context.strict {
                        return Err(Error::processing_interrupted(format!(
                            "Strict mode stops at the first record error: {}",
                            error
                        )));
                    }
                    debug!("Row {} failed: {}", row.index, error);
                    outcome.failed += 1;
                    outcome.errors.push(row_error(context, row, &error, now));
                }
                Err(error) => return Err(error),
            }
        }
        Ok(outcome)
    }

    async fn process_row(
        &self,
        context: &mut BatchContext,
        row: &RawRecord,
        outcome: &mut BatchOutcome,
        now: DateTime<Utc>,
    ) -> Result<RowResult> {
        let transformed = context.transformer.transform(row, &context.exam)?;
        for warning in &transformed.warnings {
            outcome
                .warnings
                .push(format!("Row {}: {}", row.index, warning));
        }
        if transformed.is_empty() {
            return Ok(RowResult::Skipped);
        }

        let resolution = context.resolver.resolve(&transformed.candidate).await?;
        let mut imported = false;
        for record in transformed.into_records(&resolution.identity, now) {
            let key = record.key();
            let existing = outcome.existing(self.grades.as_ref(), &key).await?;
            let decision = merge_record(existing.as_ref(), record, context.strategy);
            if !decision.outcome.is_skipped() {
                imported = true;
            }
            if let Some(write) = decision.write {
                outcome.queue(key, write);
            }
        }

        if imported {
            Ok(RowResult::Imported)
        } else {
            Ok(RowResult::Skipped)
        }
    }

    /// Write the batch, then checkpoint, then progress, then persist
    async fn commit(
        &self,
        task: &mut ImportTask,
        context: &BatchContext,
        batch_index: usize,
        outcome: BatchOutcome,
    ) -> Result<()> {
        let BatchOutcome {
            successful,
            failed,
            skipped,
            last_index,
            writes,
            errors,
            warnings,
            ..
        } = outcome;

        let record_count = writes.len();
        if task.task_type == TaskType::GradeImport {
            self.grades.write_batch(writes).await?;
        }

        for error in errors {
            task.add_error(error.clone())?;
            self.emit(task, TaskEventKind::Error { error });
        }
        for warning in warnings {
            task.add_warning(warning)?;
        }

        let mut progress = task.progress.clone();
        progress.record_batch(successful, failed, skipped);

        let payload = ResumePayload {
            layout: Some(context.transformer.layout()),
            headers: context.headers.clone(),
            identities: context.resolver.export_memo(),
        };
        let checkpoint = Checkpoint {
            task_id: task.id.clone(),
            batch_index,
            last_processed_index: last_index,
            success_count: progress.successful,
            failed_count: progress.failed,
            skipped_count: progress.skipped,
            timestamp: Utc::now(),
            payload: serde_json::to_value(&payload)?,
        };
        task.record_checkpoint(checkpoint.clone())?;
        self.emit(task, TaskEventKind::Checkpoint { checkpoint });

        progress.recalculate(task.elapsed_seconds(Utc::now()));
        task.progress = progress;
        self.emit(
            task,
            TaskEventKind::Progress {
                progress: task.progress.clone(),
            },
        );

        self.tasks.save_task(task).await?;
        debug!(
            "Task {} committed batch {} ({} records): {}",
            task.id,
            batch_index,
            record_count,
            task.progress.summary()
        );
        Ok(())
    }

    /// Record a task-level error and move the task to FAILED
    async fn fail(&self, task: &mut ImportTask, error: Error) -> Result<()> {
        warn!("Task {} failed: {}", task.id, error);
        if let Error::Structure { suggestions, .. } = &error {
            task.needs_user_input = true;
            task.suggestions = suggestions.clone();
            for suggestion in suggestions {
                push_warning(task, suggestion)?;
            }
        }

        let detailed = DetailedError::from_error(None, &error, Utc::now());
        task.add_error(detailed.clone())?;
        self.emit(task, TaskEventKind::Error { error: detailed });
        self.transition(task, TaskState::Failed).await
    }

    async fn transition(&self, task: &mut ImportTask, next: TaskState) -> Result<()> {
        let from = task.state;
        task.transition(next, Utc::now())?;
        self.tasks.save_task(task).await?;
        debug!("Task {}: {} -> {}", task.id, from, next);
        self.emit(task, TaskEventKind::State { from, to: next });
        Ok(())
    }

    fn emit(&self, task: &ImportTask, kind: TaskEventKind) {
        // No subscribers is fine
        let _ = self.events.send(TaskEvent {
            task_id: task.id.clone(),
            timestamp: Utc::now(),
            kind,
        });
    }
}

/// Itemized error for a failed row, naming the row's student and the cells
/// at fault
fn row_error(
    context: &BatchContext,
    row: &RawRecord,
    error: &Error,
    now: DateTime<Utc>,
) -> DetailedError {
    let mut detailed = DetailedError::from_error(Some(row.index), error, now);
    if let Some(record_id) = context.transformer.candidate(row).record_id() {
        detailed = detailed.with_record_id(record_id);
    }
    if let Error::IdentityResolution { .. } = error {
        for (header, raw) in context.transformer.identity_cells(row) {
            detailed = detailed.with_context(header, raw);
        }
    }
    detailed
}

fn push_warning(task: &mut ImportTask, warning: &str) -> Result<()> {
    if task.warnings.iter().any(|existing| existing == warning) {
        return Ok(());
    }
    task.add_warning(warning)
}
