use clap::Parser;
use grade_importer::cli::{args::Args, commands};
use std::process;
use tokio_util::sync::CancellationToken;

fn main() {
    // Parse command line arguments
    let args = Args::parse();

    // If no subcommand was provided, show help and available commands
    if args.command.is_none() {
        show_help_and_commands();
        process::exit(0);
    }

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        // Cancelled on the first Ctrl-C; running imports pause at their next
        // batch boundary and leave a resumable checkpoint
        let cancellation_token = CancellationToken::new();

        let signal_token = cancellation_token.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("Failed to install CTRL+C signal handler: {}", e);
                return;
            }
            eprintln!("\nReceived CTRL+C, pausing at the next batch boundary (press again to abort)");
            signal_token.cancel();

            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nAborted");
                process::exit(130);
            }
        });

        commands::run(args, cancellation_token).await
    });

    match result {
        Ok(()) => process::exit(0),
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}

/// Show help information and available commands when no subcommand is provided
fn show_help_and_commands() {
    println!("Grade Importer - Exam Result Spreadsheet Importer");
    println!("=================================================");
    println!();
    println!("Import exam result spreadsheets with free-form headers into normalized");
    println!("per-subject grade records, with resumable checkpointed import tasks.");
    println!();
    println!("USAGE:");
    println!("    grade-importer <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    import      Import CSV or Excel files, one task per file (main command)");
    println!("    resume      Continue a paused or interrupted task");
    println!("    retry       Retry a failed task, optionally forcing its layout");
    println!("    cancel      Cancel a task that is not running");
    println!("    status      Show one task in detail, or list all tasks");
    println!("    inspect     Preview header mapping and layout detection for a file");
    println!("    stats       Ranks, grade levels, and level transitions of stored exams");
    println!("    help        Show this help message or help for specific commands");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Show help information");
    println!("    -V, --version    Show version information");
    println!();
    println!("EXAMPLES:");
    println!("    # Import a directory of exports, inferring exams from file names:");
    println!("    grade-importer import ./exports");
    println!();
    println!("    # Import one file for a named exam, forcing the wide layout:");
    println!("    grade-importer import scores.xlsx --exam-title 高一期中考试 \\");
    println!("                          --exam-date 2024-04-20 --layout wide");
    println!();
    println!("    # Check how a file would be read before importing it:");
    println!("    grade-importer inspect scores.csv");
    println!();
    println!("    # Standings and grade levels for one subject:");
    println!("    grade-importer stats --exam 高一期中考试 --subject 数学 --levels nine-tier");
    println!();
    println!("For detailed help on any command, use:");
    println!("    grade-importer <COMMAND> --help");
}
