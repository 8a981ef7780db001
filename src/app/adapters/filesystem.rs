//! File-backed implementation of every store trait
//!
//! Layout under the state directory:
//!
//! ```text
//! <state_dir>/
//!   identities.json          every known student
//!   grades/<exam-id>.jsonl   one JSON line per record, one file per exam
//!   tasks/<task-id>.json     one file per import task
//!   levels/<config-id>.json  stored grade level configurations
//! ```
//!
//! Every file is replaced atomically: content goes to a temporary file in the
//! same directory which is then persisted over the target. Identities and
//! grades are loaded once and kept in memory; one process owns a state
//! directory at a time.

use super::stores::{
    GradeStore, IdentityStore, LevelConfigSource, PendingWrite, TaskStore, apply_write,
    builtin_level_config, class_key, same_person, same_student,
};
use crate::app::models::task::ImportTask;
use crate::app::models::{
    ExamInfo, GradeLevelConfig, LongFormGradeRecord, RecordKey, StudentIdentity,
};
use crate::constants::{GRADES_DIR_NAME, IDENTITIES_FILE_NAME, LEVELS_DIR_NAME, TASKS_DIR_NAME};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Namespace for exam file names derived from exam keys
const EXAM_FILE_NAMESPACE: Uuid = Uuid::from_u128(0x3f2a_91c4_5d7e_4b18_a0c6_84e2_1b9d_7f30);

/// Store rooted at a state directory
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    identities: RwLock<Vec<StudentIdentity>>,

    /// Exam key to records, filled lazily from the exam files
    grades: RwLock<HashMap<String, Vec<LongFormGradeRecord>>>,

    /// Serializes task file writes
    task_lock: Mutex<()>,
}

impl FileStore {
    /// Open or create a state directory
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [
            root.clone(),
            root.join(TASKS_DIR_NAME),
            root.join(GRADES_DIR_NAME),
            root.join(LEVELS_DIR_NAME),
        ] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                Error::io(format!("Failed to create state directory {}", dir.display()), e)
            })?;
        }

        let identities_path = root.join(IDENTITIES_FILE_NAME);
        let identities = if identities_path.exists() {
            let content = read_file(&identities_path).await?;
            serde_json::from_str(&content).map_err(|e| {
                Error::serialization(
                    format!("Failed to parse {}", identities_path.display()),
                    e,
                )
            })?
        } else {
            Vec::new()
        };

        info!("Opened state directory {}", root.display());
        Ok(Self {
            root,
            identities: RwLock::new(identities),
            grades: RwLock::new(HashMap::new()),
            task_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.root
            .join(TASKS_DIR_NAME)
            .join(format!("{}.json", file_stem(task_id)))
    }

    fn level_path(&self, id: &str) -> PathBuf {
        self.root
            .join(LEVELS_DIR_NAME)
            .join(format!("{}.json", file_stem(id)))
    }

    fn exam_path(&self, exam_key: &str) -> PathBuf {
        let id = Uuid::new_v5(&EXAM_FILE_NAMESPACE, exam_key.as_bytes());
        self.root
            .join(GRADES_DIR_NAME)
            .join(format!("{}.jsonl", id))
    }

    /// Records of one exam, loading its file on first use
    async fn ensure_exam_loaded(&self, exam_key: &str) -> Result<()> {
        if self.grades.read().await.contains_key(exam_key) {
            return Ok(());
        }
        let records = read_records(&self.exam_path(exam_key)).await?;
        self.grades
            .write()
            .await
            .entry(exam_key.to_string())
            .or_insert(records);
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for FileStore {
    async fn find_by_id(&self, student_id: &str) -> Result<Option<StudentIdentity>> {
        Ok(self
            .identities
            .read()
            .await
            .iter()
            .find(|identity| identity.student_id == student_id)
            .cloned())
    }

    async fn find_by_name_and_class(
        &self,
        name: &str,
        class_name: &str,
    ) -> Result<Option<StudentIdentity>> {
        Ok(self
            .identities
            .read()
            .await
            .iter()
            .find(|identity| same_person(identity, name, class_name))
            .cloned())
    }

    async fn candidates_in_class(&self, class_name: &str) -> Result<Vec<StudentIdentity>> {
        let key = class_key(class_name);
        Ok(self
            .identities
            .read()
            .await
            .iter()
            .filter(|identity| class_key(&identity.class_name) == key)
            .cloned()
            .collect())
    }

    async fn insert_if_absent(&self, identity: StudentIdentity) -> Result<StudentIdentity> {
        let mut identities = self.identities.write().await;
        if let Some(existing) = identities
            .iter()
            .find(|existing| same_student(existing, &identity))
        {
            return Ok(existing.clone());
        }

        identities.push(identity.clone());
        let content = serde_json::to_string_pretty(&*identities)
            .map_err(|e| Error::serialization("Failed to serialize identities", e))?;
        let path = self.root.join(IDENTITIES_FILE_NAME);
        if let Err(error) = write_atomic(&path, content.into_bytes()).await {
            identities.pop();
            return Err(error);
        }
        debug!("Stored new identity {}", identity.student_id);
        Ok(identity)
    }

    async fn identity_count(&self) -> Result<usize> {
        Ok(self.identities.read().await.len())
    }
}

#[async_trait]
impl GradeStore for FileStore {
    async fn find_existing(&self, key: &RecordKey) -> Result<Option<LongFormGradeRecord>> {
        self.ensure_exam_loaded(&key.exam).await?;
        Ok(self
            .grades
            .read()
            .await
            .get(&key.exam)
            .and_then(|records| records.iter().find(|record| record.key() == *key))
            .cloned())
    }

    async fn write_batch(&self, writes: Vec<PendingWrite>) -> Result<usize> {
        let count = writes.len();
        let mut by_exam: HashMap<String, Vec<PendingWrite>> = HashMap::new();
        for write in writes {
            by_exam.entry(write.record.exam.key()).or_default().push(write);
        }
        for exam_key in by_exam.keys() {
            self.ensure_exam_loaded(exam_key).await?;
        }

        let mut grades = self.grades.write().await;

        // Build every new file content first so a serialization failure
        // leaves memory and disk untouched
        let mut staged = Vec::with_capacity(by_exam.len());
        for (exam_key, writes) in by_exam {
            let mut records = grades.get(&exam_key).cloned().unwrap_or_default();
            for write in writes {
                apply_write(&mut records, write);
            }
            let mut content = String::new();
            for record in &records {
                let line = serde_json::to_string(record)
                    .map_err(|e| Error::serialization("Failed to serialize grade record", e))?;
                content.push_str(&line);
                content.push('\n');
            }
            staged.push((exam_key, records, content));
        }

        for (exam_key, records, content) in staged {
            write_atomic(&self.exam_path(&exam_key), content.into_bytes()).await?;
            grades.insert(exam_key, records);
        }
        Ok(count)
    }

    async fn records_for_exam(&self, exam_key: &str) -> Result<Vec<LongFormGradeRecord>> {
        self.ensure_exam_loaded(exam_key).await?;
        Ok(self
            .grades
            .read()
            .await
            .get(exam_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn exams(&self) -> Result<Vec<ExamInfo>> {
        let dir = self.root.join(GRADES_DIR_NAME);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::io(format!("Failed to list {}", dir.display()), e))?;

        let mut exams = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io(format!("Failed to list {}", dir.display()), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(record) = read_records(&path).await?.into_iter().next() {
                exams.push(record.exam);
            }
        }
        exams.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(exams)
    }
}

#[async_trait]
impl TaskStore for FileStore {
    async fn save_task(&self, task: &ImportTask) -> Result<()> {
        let content = serde_json::to_string_pretty(task)
            .map_err(|e| Error::serialization(format!("Failed to serialize task {}", task.id), e))?;
        let _guard = self.task_lock.lock().await;
        write_atomic(&self.task_path(&task.id), content.into_bytes()).await
    }

    async fn load_task(&self, task_id: &str) -> Result<Option<ImportTask>> {
        let path = self.task_path(task_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = read_file(&path).await?;
        let task = serde_json::from_str(&content).map_err(|e| {
            Error::serialization(format!("Failed to parse task file {}", path.display()), e)
        })?;
        Ok(Some(task))
    }

    async fn list_tasks(&self) -> Result<Vec<ImportTask>> {
        let pattern = self.root.join(TASKS_DIR_NAME).join("*.json");
        let paths = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::configuration(format!("Invalid task file pattern: {}", e)))?;

        let mut tasks = Vec::new();
        for path in paths.flatten() {
            let content = read_file(&path).await?;
            match serde_json::from_str::<ImportTask>(&content) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("Skipping unreadable task file {}: {}", path.display(), e),
            }
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }
}

#[async_trait]
impl LevelConfigSource for FileStore {
    async fn load_level_config(&self, id: &str) -> Result<Option<GradeLevelConfig>> {
        let path = self.level_path(id);
        if !path.exists() {
            return Ok(builtin_level_config(id));
        }
        let content = read_file(&path).await?;
        let config = serde_json::from_str(&content).map_err(|e| {
            Error::serialization(format!("Failed to parse level config {}", path.display()), e)
        })?;
        Ok(Some(config))
    }

    async fn save_level_config(&self, config: &GradeLevelConfig) -> Result<()> {
        let content = serde_json::to_string_pretty(config)
            .map_err(|e| Error::serialization("Failed to serialize level config", e))?;
        write_atomic(&self.level_path(&config.id), content.into_bytes()).await
    }
}

/// Characters safe in a file name; everything else becomes '_'
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io(format!("Failed to read {}", path.display()), e))
}

async fn read_records(path: &Path) -> Result<Vec<LongFormGradeRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = read_file(path).await?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(number, line)| {
            serde_json::from_str(line).map_err(|e| {
                Error::serialization(
                    format!("Invalid grade record on line {} of {}", number + 1, path.display()),
                    e,
                )
            })
        })
        .collect()
}

/// Replace a file through a temporary file in the same directory
///
/// The write and fsync run on the blocking pool, so callers may hold a store
/// lock across the await.
async fn write_atomic(path: &Path, content: Vec<u8>) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &content))
        .await
        .map_err(|e| Error::storage(format!("File write task failed: {}", e)))?
}

fn write_atomic_blocking(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::storage(format!("No parent directory for {}", path.display())))?;
    let mut file = NamedTempFile::new_in(dir)
        .map_err(|e| Error::io(format!("Failed to create temporary file in {}", dir.display()), e))?;
    file.write_all(content)
        .and_then(|_| file.as_file().sync_all())
        .map_err(|e| Error::io(format!("Failed to write {}", path.display()), e))?;
    file.persist(path)
        .map_err(|e| Error::io(format!("Failed to replace {}", path.display()), e.error))?;
    Ok(())
}
