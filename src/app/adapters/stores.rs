//! Persistence contracts used by the import pipeline
//!
//! The pipeline only talks to these traits. [`MemoryStore`] backs tests and
//! dry runs; [`FileStore`] backs the command line.
//!
//! [`MemoryStore`]: super::memory::MemoryStore
//! [`FileStore`]: super::filesystem::FileStore

use crate::Result;
use crate::app::models::task::ImportTask;
use crate::app::models::{
    ExamInfo, GradeLevelConfig, LongFormGradeRecord, RecordKey, StudentIdentity,
};
use crate::app::services::field_mapper::normalize_header;
use crate::app::services::field_mapper::normalize_name;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How a pending record reaches the grade store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Insert, or overwrite the record with the same key
    Upsert,
    /// Store alongside any record with the same key
    Append,
}

/// One record write produced by the merge engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub record: LongFormGradeRecord,
    pub mode: WriteMode,
}

impl PendingWrite {
    pub fn upsert(record: LongFormGradeRecord) -> Self {
        Self {
            record,
            mode: WriteMode::Upsert,
        }
    }

    pub fn append(record: LongFormGradeRecord) -> Self {
        Self {
            record,
            mode: WriteMode::Append,
        }
    }
}

/// Known students
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_id(&self, student_id: &str) -> Result<Option<StudentIdentity>>;

    /// Match on normalized name and normalized class
    async fn find_by_name_and_class(
        &self,
        name: &str,
        class_name: &str,
    ) -> Result<Option<StudentIdentity>>;

    /// Students whose class has the same class key as `class_name`
    async fn candidates_in_class(&self, class_name: &str) -> Result<Vec<StudentIdentity>>;

    /// Insert unless the same student already exists; returns the stored
    /// identity either way
    ///
    /// Ids are compared first. Two different explicit ids are two students
    /// even when their normalized names and classes agree (see
    /// [`same_student`]).
    ///
    /// Implementations make the check and the insert one atomic step.
    async fn insert_if_absent(&self, identity: StudentIdentity) -> Result<StudentIdentity>;

    async fn identity_count(&self) -> Result<usize>;
}

/// Committed long-form grade records
#[async_trait]
pub trait GradeStore: Send + Sync {
    /// First stored record with this key
    async fn find_existing(&self, key: &RecordKey) -> Result<Option<LongFormGradeRecord>>;

    /// Commit a batch; either every write lands or the call fails
    async fn write_batch(&self, writes: Vec<PendingWrite>) -> Result<usize>;

    async fn records_for_exam(&self, exam_key: &str) -> Result<Vec<LongFormGradeRecord>>;

    /// Every exam with at least one stored record
    async fn exams(&self) -> Result<Vec<ExamInfo>>;
}

/// Durable import task records
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save_task(&self, task: &ImportTask) -> Result<()>;

    async fn load_task(&self, task_id: &str) -> Result<Option<ImportTask>>;

    /// All tasks, most recently created first
    async fn list_tasks(&self) -> Result<Vec<ImportTask>>;
}

/// Grade level configurations by id
#[async_trait]
pub trait LevelConfigSource: Send + Sync {
    async fn load_level_config(&self, id: &str) -> Result<Option<GradeLevelConfig>>;

    async fn save_level_config(&self, config: &GradeLevelConfig) -> Result<()>;
}

/// Key used to group identities by class
pub fn class_key(class_name: &str) -> String {
    normalize_header(class_name)
}

/// Whether an identity has this normalized name and class
pub fn same_person(identity: &StudentIdentity, name: &str, class_name: &str) -> bool {
    normalize_name(&identity.name) == normalize_name(name)
        && class_key(&identity.class_name) == class_key(class_name)
}

/// Whether `existing` already stands for the student `identity` describes
pub fn same_student(existing: &StudentIdentity, identity: &StudentIdentity) -> bool {
    if existing.student_id == identity.student_id {
        return true;
    }
    if !existing.minted && !identity.minted {
        return false;
    }
    same_person(existing, &identity.name, &identity.class_name)
}

/// Apply one write to an in-memory record list
pub fn apply_write(records: &mut Vec<LongFormGradeRecord>, write: PendingWrite) {
    let PendingWrite { record, mode } = write;
    if mode == WriteMode::Upsert {
        let key = record.key();
        if let Some(existing) = records.iter_mut().find(|existing| existing.key() == key) {
            *existing = record;
            return;
        }
    }
    records.push(record);
}

/// Built-in level configurations served when no stored one has the id
pub fn builtin_level_config(id: &str) -> Option<GradeLevelConfig> {
    [
        GradeLevelConfig::default_six_level(),
        GradeLevelConfig::nine_tier(),
    ]
    .into_iter()
    .find(|config| config.id == id)
}
