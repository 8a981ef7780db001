//! Shared components for CLI commands
//!
//! Logging setup, layered configuration, store and runner construction,
//! input expansion, and the task reports printed by several commands.

use crate::app::adapters::filesystem::FileStore;
use crate::app::models::task::{ImportTask, TaskState};
use crate::app::services::field_mapper::MappingMemory;
use crate::app::services::import_task::{ImportPlanner, ImportRunner};
use crate::cli::args::{Args, OutputFormat};
use crate::config::Config;
use crate::constants::SOURCE_EXTENSIONS;
use crate::{Error, Result};
use colored::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Errors shown in a task report unless all are requested
const REPORTED_ERRORS: usize = 10;

/// Set up structured logging
///
/// Verbosity flags win over the configured level.
pub fn setup_logging(args: &Args, config: &Config) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args
        .get_log_level()
        .unwrap_or(config.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("grade_importer={}", log_level)));

    let result = if args.quiet {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(fmt::time::uptime())
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    // A second command in the same process keeps the first subscriber
    if result.is_ok() {
        debug!("Logging initialized at level: {}", log_level);
    }
    Ok(())
}

/// Load configuration using the layered approach (file -> env -> args)
pub fn load_configuration(args: &Args) -> Result<Config> {
    let mut config = Config::load_layered(args.config_file.as_deref())?;
    if let Some(state_dir) = &args.state_dir {
        config.storage.state_dir = state_dir.clone();
    }
    config.validate()?;
    Ok(config)
}

pub async fn open_store(config: &Config) -> Result<Arc<FileStore>> {
    let store = FileStore::open(&config.storage.state_dir).await?;
    info!("Using state directory {}", store.root().display());
    Ok(Arc::new(store))
}

/// Runner over a store, with remembered mappings when enabled
pub fn build_runner<S>(store: Arc<S>, config: &Config) -> ImportRunner
where
    S: crate::app::adapters::stores::IdentityStore
        + crate::app::adapters::stores::GradeStore
        + crate::app::adapters::stores::TaskStore
        + 'static,
{
    let mut planner = ImportPlanner::new(&config.mapping);
    if config.mapping.enable_memory {
        planner = planner.with_memory(Arc::new(MappingMemory::with_ttl_secs(
            config.mapping.memory_ttl_secs,
        )));
    }
    ImportRunner::with_store(store, config).with_planner(planner)
}

/// Expand files, directories, and glob patterns into source files
///
/// Directories are walked for supported extensions. The result is sorted and
/// free of duplicates.
pub fn expand_inputs(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();

    for input in inputs {
        let path = Path::new(input);
        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(false) {
                let entry = entry?;
                if entry.file_type().is_file() && is_source_file(entry.path()) {
                    files.insert(entry.path().to_path_buf());
                }
            }
        } else if path.is_file() {
            files.insert(path.to_path_buf());
        } else if input.contains(['*', '?', '[']) {
            let matches = glob::glob(input).map_err(|e| {
                Error::configuration(format!("Invalid glob pattern '{}': {}", input, e))
            })?;
            for entry in matches {
                let matched = entry.map_err(|e| {
                    Error::io("Failed to read glob match", std::io::Error::from(e))
                })?;
                if matched.is_file() && is_source_file(&matched) {
                    files.insert(matched);
                }
            }
        } else {
            return Err(Error::file_not_found(input.clone()));
        }
    }

    debug!("Expanded {} inputs into {} files", inputs.len(), files.len());
    Ok(files.into_iter().collect())
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn colored_state(state: TaskState) -> ColoredString {
    match state {
        TaskState::Completed => state.as_str().green(),
        TaskState::Failed | TaskState::Cancelled => state.as_str().red(),
        TaskState::Paused => state.as_str().yellow(),
        _ => state.as_str().cyan(),
    }
}

fn file_label(task: &ImportTask) -> String {
    task.source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| task.source.display().to_string())
}

/// One line per task for summaries and task lists
pub fn task_line(task: &ImportTask) -> String {
    format!(
        "{}  {:<10}  {}  {}",
        task.id.dimmed(),
        colored_state(task.state),
        file_label(task).bold(),
        task.progress.summary()
    )
}

/// What the operator can do next with a task that did not complete
pub fn next_step(task: &ImportTask) -> Option<String> {
    match task.state {
        TaskState::Paused => Some(format!("grade-importer resume {}", task.id)),
        TaskState::Failed if task.needs_user_input => Some(format!(
            "grade-importer retry {} --layout <wide|long>",
            task.id
        )),
        TaskState::Failed if task.can_retry => Some(format!("grade-importer retry {}", task.id)),
        _ => None,
    }
}

/// Print a finished or inspected task
pub fn print_task_report(task: &ImportTask, format: OutputFormat, all_errors: bool) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(task);
    }

    println!("{}", task_line(task));
    println!("  Source:      {}", task.source.display());
    println!("  Type:        {}", task.task_type);
    println!(
        "  Strategy:    {} (batch size {})",
        task.options.merge_strategy, task.options.batch_size
    );
    println!(
        "  Retries:     {}/{}",
        task.retry_count, task.options.max_retries
    );
    println!("  Checkpoints: {}", task.checkpoints.len());
    if let Some(rate) = task.progress.processing_rate {
        println!("  Rate:        {:.1} rows/s", rate);
    }
    if let Some(eta) = task.progress.estimated_seconds_remaining {
        if !task.state.is_terminal() && task.state != TaskState::Failed {
            println!("  Remaining:   ~{}s", eta);
        }
    }

    if !task.warnings.is_empty() {
        println!("  {}", format!("Warnings ({})", task.warnings.len()).yellow());
        for warning in &task.warnings {
            println!("    - {}", warning);
        }
    }

    if !task.errors.is_empty() {
        println!("  {}", format!("Errors ({})", task.errors.len()).red());
        let shown = if all_errors {
            task.errors.len()
        } else {
            REPORTED_ERRORS
        };
        for error in task.errors.iter().take(shown) {
            let location = error
                .index
                .map(|index| format!("row {}", index))
                .unwrap_or_else(|| "task".to_string());
            println!("    - [{}] {}", location, error.message);
        }
        if task.errors.len() > shown {
            println!("    ... {} more (use --all-errors)", task.errors.len() - shown);
        }
    }

    if let Some(step) = next_step(task) {
        println!("  Next:        {}", step.bold());
    }
    Ok(())
}

/// Print a list of tasks
pub fn print_task_list(tasks: &[ImportTask], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(tasks);
    }
    if tasks.is_empty() {
        println!("No import tasks");
        return Ok(());
    }
    for task in tasks {
        println!("{}", task_line(task));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::task::{ImportOptions, TaskType};
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_expand_inputs_walks_directories_and_globs() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("2024");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(temp_dir.path().join("a.csv"), "姓名\n").unwrap();
        std::fs::write(nested.join("b.xlsx"), "").unwrap();
        std::fs::write(nested.join("notes.md"), "").unwrap();

        let dir_input = temp_dir.path().display().to_string();
        let files = expand_inputs(&[dir_input]).unwrap();
        assert_eq!(files.len(), 2);

        let pattern = format!("{}/*.csv", temp_dir.path().display());
        let direct = temp_dir.path().join("a.csv").display().to_string();
        let files = expand_inputs(&[pattern, direct]).unwrap();
        assert_eq!(files, vec![temp_dir.path().join("a.csv")]);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let error = expand_inputs(&["/definitely/not/here.csv".to_string()]).unwrap_err();
        assert!(matches!(error, Error::FileNotFound { .. }));
    }

    #[test]
    fn test_next_step() {
        let mut task = ImportTask::new(
            "t1",
            TaskType::GradeImport,
            "a.csv",
            ImportOptions::default(),
            Utc::now(),
        );
        assert_eq!(next_step(&task), None);

        task.state = TaskState::Paused;
        assert_eq!(next_step(&task).as_deref(), Some("grade-importer resume t1"));

        task.state = TaskState::Failed;
        task.can_retry = true;
        task.needs_user_input = true;
        assert!(next_step(&task).unwrap().contains("--layout"));
    }
}
