//! Tests for the record transformer module


// Test helper functions and fixtures
use crate::app::models::{ExamInfo, RawRecord, TableLayout};
use crate::app::services::field_mapper::FieldMapper;
use crate::app::services::record_transformer::RecordTransformer;
use crate::config::ImportConfig;
use chrono::NaiveDate;

/// Transformer for a header row with default score limits
pub fn create_test_transformer(headers: &[&str], layout: TableLayout) -> RecordTransformer {
    let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let analysis = FieldMapper::new().analyze_headers(&headers);
    RecordTransformer::new(&analysis, layout, &ImportConfig::default())
}

/// Row under the given headers
pub fn create_test_row(index: usize, headers: &[&str], values: &[&str]) -> RawRecord {
    RawRecord::new(
        index,
        headers
            .iter()
            .zip(values.iter())
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect(),
    )
}

pub fn create_test_exam() -> ExamInfo {
    ExamInfo::new("高一期中考试")
        .with_type("midterm")
        .with_date(NaiveDate::from_ymd_opt(2024, 4, 20).unwrap())
}
