//! Commands over stored tasks: resume, retry, cancel, status

use super::import::{Drive, drive_tasks, progress_reporter, report};
use super::shared::{build_runner, open_store, print_task_list, print_task_report};
use crate::Result;
use crate::cli::args::{Args, RetryArgs, StatusArgs};
use crate::config::Config;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run_resume(
    args: &Args,
    task_id: &str,
    config: Config,
    shutdown: CancellationToken,
) -> Result<()> {
    let runner = Arc::new(build_runner(open_store(&config).await?, &config));
    let task = runner.status(task_id).await?;
    info!("Resuming task {} from {} state", task.id, task.state);

    let mut reporter = progress_reporter(args);
    reporter.label(&task.id, task.source.display().to_string());

    let outcome = drive_tasks(
        runner,
        vec![task.id],
        1,
        reporter,
        shutdown,
        Drive::Resume,
    )
    .await;
    report(args.output_format, &outcome)
}

/// Retry a failed task, optionally fixing its layout first
pub async fn run_retry(
    args: &Args,
    retry_args: &RetryArgs,
    config: Config,
    shutdown: CancellationToken,
) -> Result<()> {
    let runner = Arc::new(build_runner(open_store(&config).await?, &config));
    let task = match retry_args.layout {
        Some(layout) => runner.set_layout(&retry_args.task_id, layout).await?,
        None => runner.status(&retry_args.task_id).await?,
    };
    info!(
        "Retrying task {} (attempt {} of {})",
        task.id,
        task.retry_count + 1,
        task.options.max_retries
    );

    let mut reporter = progress_reporter(args);
    reporter.label(&task.id, task.source.display().to_string());

    let outcome = drive_tasks(runner, vec![task.id], 1, reporter, shutdown, Drive::Retry).await;
    report(args.output_format, &outcome)
}

pub async fn run_cancel(args: &Args, task_id: &str, config: Config) -> Result<()> {
    let runner = build_runner(open_store(&config).await?, &config);
    let task = runner.cancel(task_id).await?;
    print_task_report(&task, args.output_format, false)
}

pub async fn run_status(args: &Args, status_args: &StatusArgs, config: Config) -> Result<()> {
    let runner = build_runner(open_store(&config).await?, &config);
    match &status_args.task_id {
        Some(task_id) => {
            let task = runner.status(task_id).await?;
            print_task_report(&task, args.output_format, status_args.all_errors)
        }
        None => {
            let mut tasks = runner.list().await?;
            tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            print_task_list(&tasks, args.output_format)
        }
    }
}
