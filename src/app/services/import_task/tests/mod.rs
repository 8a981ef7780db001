//! Tests for import task planning and running

pub mod planning_tests;
pub mod runner_tests;

// Test helper functions and fixtures
use crate::app::adapters::memory::MemoryStore;
use crate::app::models::ExamInfo;
use crate::app::models::task::ImportOptions;
use crate::app::services::import_task::ImportRunner;
use crate::config::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Two-subject wide file from the reference scenario
pub const SCENARIO_CSV: &str = "学号,姓名,班级,语文,数学,总分\n2024001,张三,高一1班,85,92,177\n";

/// Long file with four (student, subject) rows
pub const LONG_CSV: &str = "姓名,班级,科目,分数\n\
张三,高一1班,语文,90\n\
张三,高一1班,数学,95\n\
李四,高一1班,语文,88\n\
李四,高一1班,数学,79\n";

/// Wide file with seven students, no student ids, and three subjects plus total
pub fn create_test_wide_csv() -> String {
    let mut content = String::from("姓名,班级,语文,数学,英语,总分\n");
    let students = ["张三", "李四", "王五", "赵六", "钱七", "孙八", "周九"];
    for (i, name) in students.iter().enumerate() {
        let base = 80 + i as u32;
        content.push_str(&format!(
            "{},高一{}班,{},{},{},{}\n",
            name,
            i % 2 + 1,
            base,
            base + 5,
            base + 10,
            base * 3 + 15
        ));
    }
    content
}

pub fn write_test_source(dir: &Path, file_name: &str, content: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, content).unwrap();
    path
}

pub fn create_test_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

pub fn create_test_runner(store: Arc<MemoryStore>) -> ImportRunner {
    ImportRunner::with_store(store, &Config::default())
}

pub fn create_test_exam() -> ExamInfo {
    ExamInfo::new("高一期中考试")
}

/// Default options bound to the fixture exam
pub fn create_test_options() -> ImportOptions {
    ImportOptions::default().with_exam(create_test_exam())
}
