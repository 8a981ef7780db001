//! In-memory implementation of every store trait
//!
//! Used by tests and by dry runs. Writes can be made to fail on a chosen
//! `write_batch` call to exercise batch failure and resume.

use super::stores::{
    GradeStore, IdentityStore, LevelConfigSource, PendingWrite, TaskStore, apply_write,
    builtin_level_config, class_key, same_person, same_student,
};
use crate::app::models::task::ImportTask;
use crate::app::models::{
    ExamInfo, GradeLevelConfig, LongFormGradeRecord, RecordKey, StudentIdentity,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Store holding identities, grades, tasks, and level configurations in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: RwLock<Vec<StudentIdentity>>,

    /// Records grouped by exam key
    grades: RwLock<BTreeMap<String, Vec<LongFormGradeRecord>>>,
    tasks: RwLock<BTreeMap<String, ImportTask>>,
    levels: RwLock<BTreeMap<String, GradeLevelConfig>>,

    write_calls: AtomicUsize,
    failing_writes: std::sync::Mutex<HashSet<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed known students
    pub async fn with_identities(self, identities: Vec<StudentIdentity>) -> Self {
        self.identities.write().await.extend(identities);
        self
    }

    /// Make the n-th `write_batch` call (1-based) fail with a storage error
    pub fn fail_write_call(&self, call: usize) {
        if let Ok(mut failing) = self.failing_writes.lock() {
            failing.insert(call);
        }
    }

    pub fn write_call_count(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub async fn grade_count(&self) -> usize {
        self.grades.read().await.values().map(Vec::len).sum()
    }

    pub async fn all_identities(&self) -> Vec<StudentIdentity> {
        self.identities.read().await.clone()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
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
        Ok(identity)
    }

    async fn identity_count(&self) -> Result<usize> {
        Ok(self.identities.read().await.len())
    }
}

#[async_trait]
impl GradeStore for MemoryStore {
    async fn find_existing(&self, key: &RecordKey) -> Result<Option<LongFormGradeRecord>> {
        Ok(self
            .grades
            .read()
            .await
            .get(&key.exam)
            .and_then(|records| records.iter().find(|record| record.key() == *key))
            .cloned())
    }

    async fn write_batch(&self, writes: Vec<PendingWrite>) -> Result<usize> {
        let call = self.write_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let should_fail = self
            .failing_writes
            .lock()
            .map(|mut failing| failing.remove(&call))
            .unwrap_or(false);
        if should_fail {
            return Err(Error::storage(format!(
                "Injected failure on write batch call {}",
                call
            )));
        }

        let count = writes.len();
        let mut grades = self.grades.write().await;
        for write in writes {
            let exam = write.record.exam.key();
            apply_write(grades.entry(exam).or_default(), write);
        }
        Ok(count)
    }

    async fn records_for_exam(&self, exam_key: &str) -> Result<Vec<LongFormGradeRecord>> {
        Ok(self
            .grades
            .read()
            .await
            .get(exam_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn exams(&self) -> Result<Vec<ExamInfo>> {
        Ok(self
            .grades
            .read()
            .await
            .values()
            .filter_map(|records| records.first().map(|record| record.exam.clone()))
            .collect())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn save_task(&self, task: &ImportTask) -> Result<()> {
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load_task(&self, task_id: &str) -> Result<Option<ImportTask>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<ImportTask>> {
        let mut tasks: Vec<ImportTask> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }
}

#[async_trait]
impl LevelConfigSource for MemoryStore {
    async fn load_level_config(&self, id: &str) -> Result<Option<GradeLevelConfig>> {
        if let Some(config) = self.levels.read().await.get(id) {
            return Ok(Some(config.clone()));
        }
        Ok(builtin_level_config(id))
    }

    async fn save_level_config(&self, config: &GradeLevelConfig) -> Result<()> {
        self.levels
            .write()
            .await
            .insert(config.id.clone(), config.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adapters::stores::WriteMode;
    use chrono::Utc;

    fn record(student_id: &str, subject: &str, score: f64) -> LongFormGradeRecord {
        LongFormGradeRecord {
            identity: StudentIdentity::new(student_id, "张三", "1班"),
            exam: ExamInfo::new("期中"),
            subject: subject.to_string(),
            score: Some(score),
            grade: None,
            class_rank: None,
            grade_rank: None,
            source_index: 0,
            imported_at: Utc::now(),
            extra: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent_returns_existing() {
        let store = MemoryStore::new();
        let first = store
            .insert_if_absent(StudentIdentity::new("001", "张三", "高一1班"))
            .await
            .unwrap();
        let second = store
            .insert_if_absent(StudentIdentity::new("auto_x", "张 三", "高一(1)班"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.identity_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_and_append() {
        let store = MemoryStore::new();
        store
            .write_batch(vec![PendingWrite::upsert(record("001", "语文", 90.0))])
            .await
            .unwrap();
        store
            .write_batch(vec![PendingWrite::upsert(record("001", "语文", 95.0))])
            .await
            .unwrap();
        assert_eq!(store.grade_count().await, 1);

        let key = record("001", "语文", 0.0).key();
        let stored = store.find_existing(&key).await.unwrap().unwrap();
        assert_eq!(stored.score, Some(95.0));

        store
            .write_batch(vec![PendingWrite {
                record: record("001", "语文", 80.0),
                mode: WriteMode::Append,
            }])
            .await
            .unwrap();
        assert_eq!(store.grade_count().await, 2);
        assert_eq!(store.exams().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = MemoryStore::new();
        store.fail_write_call(2);

        assert!(store.write_batch(vec![]).await.is_ok());
        assert!(matches!(
            store.write_batch(vec![]).await,
            Err(Error::Storage { .. })
        ));
        assert!(store.write_batch(vec![]).await.is_ok());
        assert_eq!(store.write_call_count(), 3);
    }

    #[tokio::test]
    async fn test_builtin_level_configs() {
        let store = MemoryStore::new();
        assert!(store.load_level_config("default").await.unwrap().is_some());
        assert!(store.load_level_config("nine-tier").await.unwrap().is_some());
        assert!(store.load_level_config("missing").await.unwrap().is_none());
    }
}
