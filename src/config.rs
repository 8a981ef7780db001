//! Configuration management and validation.
//!
//! Provides the configuration sections for importing, header mapping,
//! identity matching, derived statistics, storage, and logging. Values are
//! layered: built-in defaults, then an optional TOML file, then
//! `GRADE_IMPORTER_*` environment variables, then CLI overrides applied by
//! the command layer through the `with_*` builders.

use crate::app::models::MergeStrategy;
use crate::app::models::task::ImportOptions;
use crate::app::models::SubjectKind;
use crate::app::services::statistics::RankScope;
use crate::constants::{self, APP_DIR_NAME, CONFIG_FILE_NAME};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of environment variables read by [`Config::apply_env`]
pub const ENV_PREFIX: &str = "GRADE_IMPORTER_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub import: ImportConfig,
    pub mapping: MappingConfig,
    pub identity: IdentityConfig,
    pub statistics: StatisticsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Batch import settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Source rows per committed batch
    pub batch_size: usize,

    /// Conflict policy for existing (student, exam, subject) records
    pub merge_strategy: MergeStrategy,

    /// Retries allowed from FAILED before the task becomes terminal
    pub max_retries: u32,

    /// Mint identities for students the store does not know
    pub create_missing_students: bool,

    /// Fail a batch on its first recoverable record error
    pub strict_mode: bool,

    /// Files imported concurrently by one CLI invocation
    pub max_concurrent_tasks: usize,

    /// Score ceilings by subject key, overriding the built-in 150/100/1000
    pub score_limits: BTreeMap<String, f64>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: constants::DEFAULT_BATCH_SIZE,
            merge_strategy: MergeStrategy::default(),
            max_retries: constants::DEFAULT_MAX_RETRIES,
            create_missing_students: true,
            strict_mode: false,
            max_concurrent_tasks: num_cpus::get().clamp(1, 4),
            score_limits: BTreeMap::new(),
        }
    }
}

impl ImportConfig {
    /// Score ceiling for a subject
    pub fn max_score(&self, subject: SubjectKind) -> f64 {
        self.score_limits
            .get(subject.key())
            .copied()
            .unwrap_or_else(|| constants::max_score_for(subject.key()))
    }

    /// Snapshot these settings into per-task options
    pub fn to_options(&self) -> ImportOptions {
        ImportOptions::default()
            .with_batch_size(self.batch_size)
            .with_merge_strategy(self.merge_strategy)
            .with_max_retries(self.max_retries)
            .with_create_missing_students(self.create_missing_students)
            .with_strict_mode(self.strict_mode)
    }
}

/// Header mapping and structure detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Rows sampled for structure detection and unknown-field previews
    pub sample_size: usize,

    /// Subject score columns above which a table is wide
    pub wide_subject_threshold: usize,

    /// Aggregate confidence below which the mapping assistant is consulted
    pub assistant_threshold: f64,

    pub assistant_timeout_secs: u64,

    /// Reuse mappings confirmed by earlier imports in this process
    pub enable_memory: bool,

    pub memory_ttl_secs: u64,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            sample_size: constants::DEFAULT_SAMPLE_SIZE,
            wide_subject_threshold: constants::DEFAULT_WIDE_SUBJECT_THRESHOLD,
            assistant_threshold: constants::DEFAULT_ASSISTANT_THRESHOLD,
            assistant_timeout_secs: constants::DEFAULT_ASSISTANT_TIMEOUT_SECS,
            enable_memory: true,
            memory_ttl_secs: constants::DEFAULT_MAPPING_MEMORY_TTL_SECS,
        }
    }
}

/// Student identity matching settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Minimum name similarity for a fuzzy match
    pub fuzzy_threshold: f64,

    /// Minimum class similarity for a fuzzy match
    pub class_similarity_threshold: f64,

    pub enable_fuzzy: bool,

    /// Class assigned to rows without a class column
    pub default_class_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: constants::DEFAULT_FUZZY_THRESHOLD,
            class_similarity_threshold: constants::DEFAULT_FUZZY_THRESHOLD,
            enable_fuzzy: true,
            default_class_name: "未知班级".to_string(),
        }
    }
}

/// Derived statistics settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Grade level configuration used when none is requested
    pub level_config_id: String,

    /// Rank scope that drives percentile grade levels
    pub level_scope: RankScope,

    pub cache_ttl_secs: u64,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            level_config_id: constants::DEFAULT_LEVEL_CONFIG_ID.to_string(),
            level_scope: RankScope::Grade,
            cache_ttl_secs: constants::DEFAULT_LEVEL_CACHE_TTL_SECS,
        }
    }
}

/// Persistent state location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when neither `-v` nor `RUST_LOG` is given
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Default config file location (`~/.config/grade-importer/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Default state directory under the platform data directory
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

impl Config {
    /// Load defaults, then the config file, then the environment
    ///
    /// An explicitly given file must exist; the default location is optional.
    pub fn load_layered(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(default_path) if default_path.exists() => Self::from_file(&default_path)?,
                _ => Self::default(),
            },
        };

        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file; missing sections keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::file_not_found(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("Failed to read config {}", path.display()), e))?;
        let config: Config = toml::from_str(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply `GRADE_IMPORTER_*` overrides from an environment snapshot
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "BATCH_SIZE" => self.import.batch_size = parse_env(&key, &value)?,
                "MERGE_STRATEGY" => self.import.merge_strategy = value.parse()?,
                "MAX_RETRIES" => self.import.max_retries = parse_env(&key, &value)?,
                "STRICT_MODE" => self.import.strict_mode = parse_env(&key, &value)?,
                "MAX_CONCURRENT_TASKS" => {
                    self.import.max_concurrent_tasks = parse_env(&key, &value)?
                }
                "WIDE_SUBJECT_THRESHOLD" => {
                    self.mapping.wide_subject_threshold = parse_env(&key, &value)?
                }
                "FUZZY_THRESHOLD" => self.identity.fuzzy_threshold = parse_env(&key, &value)?,
                "LEVEL_CONFIG" => self.statistics.level_config_id = value,
                "STATE_DIR" => self.storage.state_dir = PathBuf::from(value),
                "LOG_LEVEL" => self.logging.level = value,
                _ => debug!("Ignoring unknown environment override {}", key),
            }
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.import.batch_size == 0 {
            return Err(Error::configuration("import.batch_size must be at least 1"));
        }
        if self.import.max_concurrent_tasks == 0 {
            return Err(Error::configuration(
                "import.max_concurrent_tasks must be at least 1",
            ));
        }
        for (subject, limit) in &self.import.score_limits {
            if SubjectKind::from_key(subject).is_none() {
                return Err(Error::configuration(format!(
                    "import.score_limits has unknown subject '{}'",
                    subject
                )));
            }
            if *limit <= 0.0 {
                return Err(Error::configuration(format!(
                    "import.score_limits.{} must be positive",
                    subject
                )));
            }
        }
        for (name, value) in [
            ("identity.fuzzy_threshold", self.identity.fuzzy_threshold),
            (
                "identity.class_similarity_threshold",
                self.identity.class_similarity_threshold,
            ),
            ("mapping.assistant_threshold", self.mapping.assistant_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::configuration(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        if self.mapping.sample_size == 0 {
            return Err(Error::configuration("mapping.sample_size must be at least 1"));
        }
        Ok(())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.import.batch_size = batch_size;
        self
    }

    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.import.merge_strategy = strategy;
        self
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.storage.state_dir = state_dir.into();
        self
    }

    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.import.strict_mode = strict;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, tasks: usize) -> Self {
        self.import.max_concurrent_tasks = tasks;
        self
    }

    pub fn with_level_config(mut self, id: impl Into<String>) -> Self {
        self.statistics.level_config_id = id.into();
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::configuration(format!("Invalid value '{}' for {}", value, key)))
}
