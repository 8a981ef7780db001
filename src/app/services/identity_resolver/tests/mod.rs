//! Tests for identity resolution and merging

pub mod resolver_tests;

// Test helper functions and fixtures
use crate::app::adapters::memory::MemoryStore;
use crate::app::models::{ExamInfo, IdentityCandidate, LongFormGradeRecord, StudentIdentity};
use crate::app::services::identity_resolver::IdentityResolver;
use crate::config::IdentityConfig;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Store seeded with three students across two classes
pub async fn create_test_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new()
        .with_identities(vec![
            StudentIdentity::new("001", "张三", "高一1班"),
            StudentIdentity::new("002", "李四", "高一1班"),
            StudentIdentity::new("003", "Zhang San", "高一2班"),
        ])
        .await;
    Arc::new(store)
}

pub fn create_test_resolver(store: Arc<MemoryStore>) -> IdentityResolver {
    IdentityResolver::new(store, IdentityConfig::default())
}

pub fn create_test_candidate(
    student_id: Option<&str>,
    name: Option<&str>,
    class_name: Option<&str>,
) -> IdentityCandidate {
    IdentityCandidate {
        student_id: student_id.map(str::to_string),
        name: name.map(str::to_string),
        class_name: class_name.map(str::to_string),
    }
}

pub fn create_test_record(score: Option<f64>, grade: Option<&str>) -> LongFormGradeRecord {
    LongFormGradeRecord {
        identity: StudentIdentity::new("001", "张三", "高一1班"),
        exam: ExamInfo::new("期中考试"),
        subject: "数学".to_string(),
        score,
        grade: grade.map(str::to_string),
        class_rank: None,
        grade_rank: None,
        source_index: 0,
        imported_at: Utc::now(),
        extra: BTreeMap::new(),
    }
}
