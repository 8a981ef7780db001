//! Grade Importer Library
//!
//! A Rust library for importing school exam result spreadsheets whose headers
//! follow no fixed convention, and normalizing them into one grade record per
//! (student, exam, subject).
//!
//! This library provides tools for:
//! - Mapping free-form column headers onto canonical fields with a confidence score
//! - Detecting wide, long, and mixed table layouts
//! - Transforming wide rows into long-form grade records
//! - Resolving student identities with exact, fuzzy, and minted matches
//! - Running imports as resumable tasks with batch checkpoints
//! - Deriving ranks, percentile grade levels, and level transition metrics

pub mod config;
pub mod constants;

// Core application modules
pub mod app {
    pub mod cache;
    pub mod models;
    pub mod services {
        pub mod exam_inference;
        pub mod field_mapper;
        pub mod identity_resolver;
        pub mod import_task;
        pub mod record_transformer;
        pub mod source_reader;
        pub mod statistics;
        pub mod structure_detector;
    }
    pub mod adapters {
        pub mod filesystem;
        pub mod memory;
        pub mod stores;
    }
}

// CLI modules
pub mod cli {
    pub mod args;
    pub mod commands;
}

pub use app::models::task::{ImportTask, TaskState};
pub use app::models::{
    CanonicalField, FieldMapping, GradeLevelConfig, LongFormGradeRecord, StudentIdentity,
};
pub use config::Config;

/// Result type alias for the grade importer
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for grade import operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV parsing error
    #[error("CSV parsing error in file '{file}': {message}")]
    CsvParsing {
        file: String,
        message: String,
        #[source]
        source: Option<csv::Error>,
    },

    /// Spreadsheet workbook could not be opened or read
    #[error("Spreadsheet error in file '{file}': {message}")]
    Spreadsheet { file: String, message: String },

    /// Source file extension is not a supported tabular format
    #[error("Unsupported source format: {path}")]
    UnsupportedFormat { path: String },

    /// JSON serialization error for persisted state
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Row-level data validation error
    #[error("Data validation error: {message}")]
    DataValidation {
        message: String,
        /// Offending (column, raw value) pairs
        cells: Vec<(String, String)>,
    },

    /// Student identity could not be resolved
    #[error("Identity resolution error: {message}")]
    IdentityResolution { message: String },

    /// Table structure could not be classified without operator input
    #[error("Structure error: {message}")]
    Structure {
        message: String,
        suggestions: Vec<String>,
    },

    /// Illegal task state transition
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },

    /// Task not present in the task store
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// Retry budget for a task is spent
    #[error("Retry limit exceeded for task {task_id}: {retries} retries")]
    RetryLimitExceeded { task_id: String, retries: u32 },

    /// Backing store failure
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Grade level configuration is not a valid partition
    #[error("Grade level configuration error: {message}")]
    LevelConfig { message: String },

    /// File not found
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Directory traversal error
    #[error("Directory traversal error: {message}")]
    DirectoryTraversal {
        message: String,
        #[source]
        source: walkdir::Error,
    },

    /// Processing interrupted
    #[error("Processing interrupted: {reason}")]
    ProcessingInterrupted { reason: String },
}

impl Error {
    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a CSV parsing error with context
    pub fn csv_parsing(
        file: impl Into<String>,
        message: impl Into<String>,
        source: Option<csv::Error>,
    ) -> Self {
        Self::CsvParsing {
            file: file.into(),
            message: message.into(),
            source,
        }
    }

    /// Create a spreadsheet error
    pub fn spreadsheet(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Spreadsheet {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn unsupported_format(path: impl Into<String>) -> Self {
        Self::UnsupportedFormat { path: path.into() }
    }

    /// Create a serialization error with context
    pub fn serialization(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            message: message.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a data validation error
    pub fn data_validation(message: impl Into<String>) -> Self {
        Self::DataValidation {
            message: message.into(),
            cells: Vec::new(),
        }
    }

    /// Create a data validation error naming the cells that could not be used
    pub fn invalid_cells(message: impl Into<String>, cells: Vec<(String, String)>) -> Self {
        Self::DataValidation {
            message: message.into(),
            cells,
        }
    }

    /// Create an identity resolution error
    pub fn identity_resolution(message: impl Into<String>) -> Self {
        Self::IdentityResolution {
            message: message.into(),
        }
    }

    /// Create a structure error carrying operator suggestions
    pub fn structure(message: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self::Structure {
            message: message.into(),
            suggestions,
        }
    }

    /// Create an invalid transition error
    pub fn invalid_transition(task_id: impl Into<String>, from: TaskState, to: TaskState) -> Self {
        Self::InvalidTransition {
            task_id: task_id.into(),
            from,
            to,
        }
    }

    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    pub fn retry_limit_exceeded(task_id: impl Into<String>, retries: u32) -> Self {
        Self::RetryLimitExceeded {
            task_id: task_id.into(),
            retries,
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a grade level configuration error
    pub fn level_config(message: impl Into<String>) -> Self {
        Self::LevelConfig {
            message: message.into(),
        }
    }

    /// Create a file not found error
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create a processing interrupted error
    pub fn processing_interrupted(reason: impl Into<String>) -> Self {
        Self::ProcessingInterrupted {
            reason: reason.into(),
        }
    }

    /// Whether the failure is confined to a single record
    ///
    /// Recoverable errors are recorded against the offending row and the
    /// batch continues. Everything else aborts the current batch.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DataValidation { .. } | Self::IdentityResolution { .. }
        )
    }
}

// Automatic conversions from common error types
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: "I/O operation failed".to_string(),
            source: error,
        }
    }
}

impl From<csv::Error> for Error {
    fn from(error: csv::Error) -> Self {
        Self::CsvParsing {
            file: "unknown".to_string(),
            message: "CSV parsing failed".to_string(),
            source: Some(error),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            message: "JSON serialization failed".to_string(),
            source: error,
        }
    }
}

impl From<calamine::Error> for Error {
    fn from(error: calamine::Error) -> Self {
        Self::Spreadsheet {
            file: "unknown".to_string(),
            message: error.to_string(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Self::Configuration {
            message: format!("Invalid TOML configuration: {}", error),
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(error: walkdir::Error) -> Self {
        Self::DirectoryTraversal {
            message: "Directory traversal failed".to_string(),
            source: error,
        }
    }
}
