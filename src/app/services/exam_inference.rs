//! Exam information inferred from source file names
//!
//! Used only when the exam is neither given on the command line nor present
//! as columns. "2024-03-15高一期中考试.xlsx" yields title "2024-03-15高一期中考试",
//! type `midterm`, and date 2024-03-15.

use crate::app::models::ExamInfo;
use crate::constants::EXAM_TYPE_KEYWORDS;
use chrono::NaiveDate;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})[-年/.](\d{1,2})[-月/.](\d{1,2})").expect("valid exam date pattern")
});

/// Exam type keyword contained in a name
pub fn infer_exam_type(name: &str) -> Option<&'static str> {
    EXAM_TYPE_KEYWORDS
        .iter()
        .find(|(keyword, _)| name.contains(keyword))
        .map(|(_, exam_type)| *exam_type)
}

/// First valid date written as `YYYY-MM-DD`, `YYYY年MM月DD`, `YYYY/MM/DD`, or `YYYY.MM.DD`
pub fn infer_exam_date(name: &str) -> Option<NaiveDate> {
    DATE_PATTERN.captures_iter(name).find_map(|captures| {
        let year = captures.get(1)?.as_str().parse().ok()?;
        let month = captures.get(2)?.as_str().parse().ok()?;
        let day = captures.get(3)?.as_str().parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

/// Exam information from a file path; `None` when the path has no stem
pub fn infer_from_path(path: &Path) -> Option<ExamInfo> {
    let stem = path.file_stem()?.to_str()?.trim();
    if stem.is_empty() {
        return None;
    }
    let mut exam = ExamInfo::new(stem);
    if let Some(exam_type) = infer_exam_type(stem) {
        exam = exam.with_type(exam_type);
    }
    if let Some(date) = infer_exam_date(stem) {
        exam = exam.with_date(date);
    }
    Some(exam)
}
