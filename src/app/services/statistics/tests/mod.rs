//! Tests for derived statistics

pub mod grade_levels_tests;

// Test helper functions and fixtures
use crate::app::adapters::memory::MemoryStore;
use crate::app::adapters::stores::PendingWrite;
use crate::app::adapters::stores::GradeStore;
use crate::app::models::{ExamInfo, LongFormGradeRecord, StudentIdentity};
use chrono::Utc;
use std::collections::BTreeMap;

pub fn create_test_record(
    student_id: &str,
    class_name: &str,
    exam: &ExamInfo,
    subject: &str,
    score: Option<f64>,
) -> LongFormGradeRecord {
    LongFormGradeRecord {
        identity: StudentIdentity::new(student_id, format!("学生{}", student_id), class_name),
        exam: exam.clone(),
        subject: subject.to_string(),
        score,
        grade: None,
        class_rank: None,
        grade_rank: None,
        source_index: 0,
        imported_at: Utc::now(),
        extra: BTreeMap::new(),
    }
}

/// 100 students in four classes of 高一 with distinct totals 100..=1
pub fn create_test_cohort(exam: &ExamInfo) -> Vec<LongFormGradeRecord> {
    (0..100)
        .map(|i| {
            let class_name = format!("高一{}班", i % 4 + 1);
            create_test_record(
                &format!("s{:03}", i),
                &class_name,
                exam,
                "总分",
                Some(f64::from(100 - i)),
            )
        })
        .collect()
}

pub async fn create_test_store(records: Vec<LongFormGradeRecord>) -> MemoryStore {
    let store = MemoryStore::new();
    store
        .write_batch(records.into_iter().map(PendingWrite::upsert).collect())
        .await
        .unwrap();
    store
}
