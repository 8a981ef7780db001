//! Command implementations for the grade importer CLI
//!
//! Each command lives in its own module:
//! - `import`: Expand inputs and run one import task per file
//! - `tasks`: Resume, retry, cancel, and report on stored tasks
//! - `inspect`: Header mapping and layout preview without importing
//! - `stats`: Ranks, grade levels, and transitions of stored exams

pub mod import;
pub mod inspect;
pub mod shared;
pub mod stats;
pub mod tasks;

use crate::Result;
use crate::cli::args::{Args, Commands};
use tokio_util::sync::CancellationToken;

/// Dispatch to the subcommand handler
///
/// `shutdown` is cancelled on Ctrl-C; running imports pause at their next
/// batch boundary when it fires.
pub async fn run(args: Args, shutdown: CancellationToken) -> Result<()> {
    let config = shared::load_configuration(&args)?;
    shared::setup_logging(&args, &config)?;

    let Some(command) = args.get_command() else {
        return Ok(());
    };
    match command {
        Commands::Import(import_args) => {
            import::run_import(&args, import_args, config, shutdown).await
        }
        Commands::Resume(task_args) => {
            tasks::run_resume(&args, &task_args.task_id, config, shutdown).await
        }
        Commands::Retry(retry_args) => tasks::run_retry(&args, retry_args, config, shutdown).await,
        Commands::Cancel(task_args) => tasks::run_cancel(&args, &task_args.task_id, config).await,
        Commands::Status(status_args) => tasks::run_status(&args, status_args, config).await,
        Commands::Inspect(inspect_args) => inspect::run_inspect(&args, inspect_args, config).await,
        Commands::Stats(stats_args) => stats::run_stats(&args, stats_args, config).await,
    }
}
