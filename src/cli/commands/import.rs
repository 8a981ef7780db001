//! Import command: one resumable task per input file

use super::shared::{build_runner, expand_inputs, next_step, open_store, print_json, task_line};
use crate::app::adapters::memory::MemoryStore;
use crate::app::models::task::{ImportOptions, ImportTask, TaskState, TaskType};
use crate::app::services::import_task::{ImportRunner, ProgressReporter, TaskControl};
use crate::cli::args::{Args, ImportArgs, OutputFormat};
use crate::config::Config;
use crate::{Error, Result};
use colored::*;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a batch of driven tasks is (re)entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive {
    Start,
    Resume,
    Retry,
}

/// Tasks that ran to a stop, and runner errors for those that could not run
pub struct DriveOutcome {
    pub tasks: Vec<ImportTask>,
    pub errors: Vec<Error>,
}

impl DriveOutcome {
    pub fn incomplete(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| task.state != TaskState::Completed)
            .count()
            + self.errors.len()
    }
}

pub async fn run_import(
    args: &Args,
    import_args: &ImportArgs,
    mut config: Config,
    shutdown: CancellationToken,
) -> Result<()> {
    import_args.validate()?;
    apply_overrides(&mut config, import_args);
    config.validate()?;

    let files = expand_inputs(&import_args.inputs)?;
    if files.is_empty() {
        return Err(Error::configuration("No source files matched the inputs"));
    }
    info!("Importing {} files", files.len());

    // Dry runs resolve identities against a scratch store
    let (runner, task_type) = if import_args.dry_run {
        let store = Arc::new(MemoryStore::new());
        (build_runner(store, &config), TaskType::DryRun)
    } else {
        (
            build_runner(open_store(&config).await?, &config),
            TaskType::GradeImport,
        )
    };
    let runner = Arc::new(runner);
    let options = task_options(&config, import_args);

    let mut reporter = progress_reporter(args);
    let mut task_ids = Vec::new();
    for file in &files {
        let task = runner.create_task(file, options.clone(), task_type).await?;
        runner.enqueue(&task.id).await?;
        reporter.label(&task.id, file_label(file));
        task_ids.push(task.id);
    }

    let outcome = drive_tasks(
        runner,
        task_ids,
        config.import.max_concurrent_tasks,
        reporter,
        shutdown,
        Drive::Start,
    )
    .await;
    report(args.output_format, &outcome)
}

/// Fold import flags into the configuration
pub fn apply_overrides(config: &mut Config, import_args: &ImportArgs) {
    if let Some(batch_size) = import_args.batch_size {
        config.import.batch_size = batch_size;
    }
    if let Some(strategy) = import_args.merge_strategy {
        config.import.merge_strategy = strategy;
    }
    if let Some(jobs) = import_args.jobs {
        config.import.max_concurrent_tasks = jobs;
    }
    if import_args.strict {
        config.import.strict_mode = true;
    }
    if import_args.no_create_students {
        config.import.create_missing_students = false;
    }
}

pub fn task_options(config: &Config, import_args: &ImportArgs) -> ImportOptions {
    let mut options = config.import.to_options();
    if let Some(layout) = import_args.layout {
        options = options.with_layout(layout);
    }
    if let Some(exam) = import_args.exam() {
        options = options.with_exam(exam);
    }
    options
}

pub fn progress_reporter(args: &Args) -> ProgressReporter {
    if args.show_progress() {
        ProgressReporter::new()
    } else {
        ProgressReporter::hidden()
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Run tasks concurrently, at most `concurrency` at a time
///
/// Cancelling `shutdown` pauses every running task at its next batch
/// boundary; tasks still waiting for a slot stay queued.
pub async fn drive_tasks(
    runner: Arc<ImportRunner>,
    task_ids: Vec<String>,
    concurrency: usize,
    reporter: ProgressReporter,
    shutdown: CancellationToken,
    drive: Drive,
) -> DriveOutcome {
    let progress = tokio::spawn(reporter.run(runner.subscribe()));
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let control = TaskControl::new();

    let watcher = {
        let control = control.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            warn!("Interrupted; pausing tasks at the next batch boundary");
            control.pause();
        })
    };

    let mut join_set = JoinSet::new();
    for task_id in task_ids {
        let runner = runner.clone();
        let semaphore = semaphore.clone();
        let control = control.clone();
        let shutdown = shutdown.clone();
        join_set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| Error::processing_interrupted(e.to_string()))?;
            if shutdown.is_cancelled() || control.is_pause_requested() {
                return runner.status(&task_id).await;
            }
            match drive {
                Drive::Start => runner.start(&task_id, &control).await,
                Drive::Resume => runner.resume(&task_id, &control).await,
                Drive::Retry => runner.retry(&task_id, &control).await,
            }
        });
    }
    drop(runner);

    let mut tasks = Vec::new();
    let mut errors = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(task)) => {
                debug!("Task {} stopped in {}", task.id, task.state);
                tasks.push(task);
            }
            Ok(Err(e)) => {
                error!("{}", e);
                errors.push(e);
            }
            Err(e) => errors.push(Error::processing_interrupted(format!(
                "Import worker stopped: {}",
                e
            ))),
        }
    }
    watcher.abort();

    // Every runner handle is gone, so the event stream closes
    if let Err(e) = progress.await {
        debug!("Progress reporter stopped: {}", e);
    }

    tasks.sort_by(|a, b| a.source.cmp(&b.source));
    DriveOutcome { tasks, errors }
}

/// Print the outcome; an error when any task did not complete
pub fn report(format: OutputFormat, outcome: &DriveOutcome) -> Result<()> {
    if format == OutputFormat::Json {
        print_json(&outcome.tasks)?;
    } else {
        println!();
        println!("{}", "Import summary".bold());
        for task in &outcome.tasks {
            println!("{}", task_line(task));
            for error in task.errors.iter().filter(|e| e.index.is_none()) {
                println!("    {} {}", "error:".red(), error.message);
            }
            if let Some(step) = next_step(task) {
                println!("    next: {}", step.bold());
            }
        }
        for error in &outcome.errors {
            println!("{} {}", "error:".red(), error);
        }

        let rows: usize = outcome.tasks.iter().map(|t| t.progress.successful).sum();
        let completed = outcome.tasks.len() + outcome.errors.len() - outcome.incomplete();
        println!(
            "{} of {} tasks completed, {} rows imported",
            completed,
            outcome.tasks.len() + outcome.errors.len(),
            rows
        );
    }

    match outcome.incomplete() {
        0 => Ok(()),
        incomplete => Err(Error::processing_interrupted(format!(
            "{} of {} tasks did not complete",
            incomplete,
            outcome.tasks.len() + outcome.errors.len()
        ))),
    }
}
