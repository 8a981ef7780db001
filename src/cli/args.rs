//! Command-line argument definitions for the grade importer
//!
//! This module defines the complete CLI interface using the clap derive API.
//! Global flags (verbosity, config file, state directory, output format) are
//! accepted before or after the subcommand.

use crate::app::models::{ExamInfo, MergeStrategy, TableLayout};
use crate::app::services::statistics::RankScope;
use crate::{Error, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// CLI arguments for the grade importer
///
/// Imports exam result spreadsheets with free-form headers, tracks each file
/// as a resumable task, and reports ranks and grade levels afterwards.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "grade-importer",
    version,
    about = "Import exam result spreadsheets into normalized per-subject grade records",
    long_about = "Reads CSV and Excel exports whose headers follow no fixed convention, maps them \
                  onto a canonical vocabulary, turns wide rows into one record per subject, \
                  resolves student identities, and commits the result in checkpointed batches \
                  that can be paused, resumed, and retried."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Logging verbosity level
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)"
    )]
    pub verbose: u8,

    /// Only show errors
    #[arg(
        short = 'q',
        long = "quiet",
        global = true,
        conflicts_with = "verbose",
        help = "Suppress output except errors"
    )]
    pub quiet: bool,

    /// Path to configuration file
    ///
    /// If not specified, ~/.config/grade-importer/config.toml is used when it
    /// exists.
    #[arg(
        short = 'c',
        long = "config",
        value_name = "FILE",
        global = true,
        help = "Path to configuration file (TOML format)"
    )]
    pub config_file: Option<PathBuf>,

    /// Directory holding tasks, identities, and grades
    #[arg(
        long = "state-dir",
        value_name = "DIR",
        global = true,
        help = "Directory holding tasks, identities, and committed grades"
    )]
    pub state_dir: Option<PathBuf>,

    #[arg(
        long = "format",
        value_enum,
        default_value = "human",
        global = true,
        help = "Output format for results"
    )]
    pub output_format: OutputFormat,
}

/// Available subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Import one or more files, one task per file
    Import(ImportArgs),
    /// Continue a paused or interrupted task after its last checkpoint
    Resume(TaskArgs),
    /// Retry a failed task
    Retry(RetryArgs),
    /// Cancel a task that is not running
    Cancel(TaskArgs),
    /// Show one task in detail, or list all tasks
    Status(StatusArgs),
    /// Preview header mapping and layout detection for a file
    Inspect(InspectArgs),
    /// Ranks, grade levels, and level transitions of stored exams
    Stats(StatsArgs),
}

/// Arguments for the import command
#[derive(Debug, Clone, Parser)]
pub struct ImportArgs {
    /// Files, directories, or glob patterns to import
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<String>,

    /// Exam applied to rows without an exam column
    ///
    /// Inferred from each file name when not given.
    #[arg(long = "exam-title", value_name = "TITLE")]
    pub exam_title: Option<String>,

    #[arg(long = "exam-type", value_name = "TYPE", requires = "exam_title")]
    pub exam_type: Option<String>,

    #[arg(
        long = "exam-date",
        value_name = "YYYY-MM-DD",
        value_parser = parse_date,
        requires = "exam_title"
    )]
    pub exam_date: Option<NaiveDate>,

    #[arg(short = 'b', long = "batch-size", value_name = "ROWS")]
    pub batch_size: Option<usize>,

    #[arg(
        short = 'm',
        long = "merge-strategy",
        value_name = "STRATEGY",
        value_parser = parse_merge_strategy,
        help = "How to merge records that already exist: replace, update, skip, append"
    )]
    pub merge_strategy: Option<MergeStrategy>,

    /// Read every file with this layout instead of detecting it
    #[arg(
        long = "layout",
        value_name = "LAYOUT",
        value_parser = parse_layout,
        help = "Force the table layout: wide or long"
    )]
    pub layout: Option<TableLayout>,

    /// Run every stage but commit nothing
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Fail a batch on its first record error
    #[arg(long = "strict")]
    pub strict: bool,

    /// Fail rows whose student is not already known
    #[arg(long = "no-create-students")]
    pub no_create_students: bool,

    /// Number of files imported at the same time
    #[arg(short = 'j', long = "jobs", value_name = "COUNT")]
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone, Parser)]
pub struct TaskArgs {
    #[arg(value_name = "TASK_ID")]
    pub task_id: String,
}

#[derive(Debug, Clone, Parser)]
pub struct RetryArgs {
    #[arg(value_name = "TASK_ID")]
    pub task_id: String,

    /// Layout to use from now on, for tasks that stopped on a mixed layout
    #[arg(long = "layout", value_name = "LAYOUT", value_parser = parse_layout)]
    pub layout: Option<TableLayout>,
}

#[derive(Debug, Clone, Parser)]
pub struct StatusArgs {
    /// Task to show; all tasks are listed when omitted
    #[arg(value_name = "TASK_ID")]
    pub task_id: Option<String>,

    /// Print every recorded error instead of the first few
    #[arg(long = "all-errors")]
    pub all_errors: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct InspectArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    #[arg(long = "layout", value_name = "LAYOUT", value_parser = parse_layout)]
    pub layout: Option<TableLayout>,
}

#[derive(Debug, Clone, Parser)]
pub struct StatsArgs {
    /// Exam title; the most recent exam with this title is used
    #[arg(long = "exam", value_name = "TITLE")]
    pub exam: String,

    /// Grade level configuration id
    #[arg(long = "levels", value_name = "CONFIG_ID")]
    pub levels: Option<String>,

    /// Subject whose standings are listed
    #[arg(long = "subject", value_name = "SUBJECT")]
    pub subject: Option<String>,

    /// Rank scope whose percentile drives grade levels
    #[arg(long = "scope", value_name = "SCOPE", value_parser = parse_scope)]
    pub scope: Option<RankScope>,

    /// Entry exam for transition metrics
    #[arg(long = "entry", value_name = "TITLE", requires = "exit")]
    pub entry: Option<String>,

    /// Exit exam for transition metrics
    #[arg(long = "exit", value_name = "TITLE", requires = "entry")]
    pub exit: Option<String>,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON format for scripting
    Json,
}

impl Args {
    pub fn get_command(&self) -> Option<&Commands> {
        self.command.as_ref()
    }

    /// Log level from the verbosity flags, if they say anything
    pub fn get_log_level(&self) -> Option<&'static str> {
        if self.quiet {
            return Some("error");
        }
        match self.verbose {
            0 => None,
            1 => Some("info"),
            2 => Some("debug"),
            _ => Some("trace"),
        }
    }

    /// Progress bars are drawn for human output unless quiet
    pub fn show_progress(&self) -> bool {
        !self.quiet && self.output_format == OutputFormat::Human
    }
}

impl ImportArgs {
    /// Exam given on the command line, if any
    pub fn exam(&self) -> Option<ExamInfo> {
        let title = self.exam_title.as_deref()?.trim();
        if title.is_empty() {
            return None;
        }
        let mut exam = ExamInfo::new(title);
        if let Some(exam_type) = &self.exam_type {
            exam = exam.with_type(exam_type.as_str());
        }
        if let Some(date) = self.exam_date {
            exam = exam.with_date(date);
        }
        Some(exam)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == Some(0) {
            return Err(Error::configuration("Batch size must be greater than 0"));
        }
        if self.jobs == Some(0) {
            return Err(Error::configuration("Jobs must be greater than 0"));
        }
        if self.layout == Some(TableLayout::Mixed) {
            return Err(Error::configuration(
                "The forced layout must be wide or long",
            ));
        }
        Ok(())
    }
}

fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}', expected YYYY-MM-DD", value))
}

fn parse_merge_strategy(value: &str) -> std::result::Result<MergeStrategy, String> {
    value.parse().map_err(|e: Error| e.to_string())
}

fn parse_layout(value: &str) -> std::result::Result<TableLayout, String> {
    value.parse().map_err(|e: Error| e.to_string())
}

fn parse_scope(value: &str) -> std::result::Result<RankScope, String> {
    value.parse().map_err(|e: Error| e.to_string())
}
