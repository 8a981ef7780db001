//! Tests for remembered header mappings

use super::*;
use crate::app::cache::ManualClock;
use crate::app::models::{AttributeKind, CanonicalField, FieldMapping, MappingSource, SubjectKind};
use crate::app::services::field_mapper::{FieldMapper, HeaderAnalysis, MappingMemory};
use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

fn confirmed_analysis() -> HeaderAnalysis {
    let headers = create_test_headers(&["姓名", "yw_fs"]);
    let mut mappings = FieldMapper::new().analyze_headers(&headers).mappings;
    mappings[1] = FieldMapping::mapped(
        "yw_fs",
        "ywfs",
        CanonicalField::Subject(SubjectKind::Chinese, AttributeKind::Score),
        0.85,
        "assistant",
    )
    .with_source(MappingSource::Assistant);
    HeaderAnalysis::from_mappings(mappings)
}

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
    ))
}

#[test]
fn test_apply_reuses_remembered_mapping() {
    let memory = MappingMemory::new(Duration::hours(1), manual_clock());
    assert_eq!(memory.remember(&confirmed_analysis()), 2);

    // Same header written differently in a later file
    let headers = create_test_headers(&["学号", "姓名", "YW-FS"]);
    let fresh = FieldMapper::new().analyze_headers(&headers);
    assert_eq!(fresh.target_of("YW-FS"), None);

    let applied = memory.apply(&fresh);

    assert_eq!(
        applied.target_of("YW-FS"),
        Some(CanonicalField::Subject(
            SubjectKind::Chinese,
            AttributeKind::Score
        ))
    );
    assert_eq!(applied.mappings[2].source, MappingSource::Cache);
    assert_eq!(applied.mappings[2].header, "YW-FS");
    assert_eq!(applied.target_of("学号"), Some(CanonicalField::StudentId));
}

#[test]
fn test_strong_local_mapping_is_not_replaced() {
    let memory = MappingMemory::with_ttl_secs(3600);
    let confused = HeaderAnalysis::from_mappings(vec![FieldMapping::mapped(
        "姓名",
        "姓名",
        CanonicalField::ClassName,
        1.0,
        "test",
    )]);
    memory.remember(&confused);

    let fresh = FieldMapper::new().analyze_headers(&create_test_headers(&["姓名"]));
    let applied = memory.apply(&fresh);

    assert_eq!(applied.target_of("姓名"), Some(CanonicalField::Name));
}

#[test]
fn test_remembered_mappings_expire() {
    let clock = manual_clock();
    let memory = MappingMemory::new(Duration::minutes(5), clock.clone());
    memory.remember(&confirmed_analysis());
    assert!(memory.recall("ywfs").is_some());

    clock.advance(Duration::minutes(6));

    assert!(memory.recall("ywfs").is_none());
    let fresh = FieldMapper::new().analyze_headers(&create_test_headers(&["yw_fs"]));
    assert_eq!(memory.apply(&fresh).target_of("yw_fs"), None);
}

#[test]
fn test_invalidate_and_clear() {
    let memory = MappingMemory::with_ttl_secs(3600);
    memory.remember(&confirmed_analysis());

    assert!(memory.invalidate("ywfs"));
    assert!(!memory.invalidate("ywfs"));
    assert_eq!(memory.len(), 1);

    memory.clear();
    assert!(memory.is_empty());
}
