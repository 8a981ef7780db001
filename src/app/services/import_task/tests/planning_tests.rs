//! Tests for import planning

use super::*;
use crate::app::models::{AttributeKind, CanonicalField, SubjectKind, TableLayout};
use crate::app::services::field_mapper::{
    AssistantRequest, AssistantResponse, MappingAssistant, MappingMemory,
};
use crate::app::services::import_task::ImportPlanner;
use crate::app::services::source_reader::SourceTable;
use crate::config::MappingConfig;
use async_trait::async_trait;
use std::collections::BTreeMap;

struct PinyinAssistant;

#[async_trait]
impl MappingAssistant for PinyinAssistant {
    async fn suggest(&self, _request: &AssistantRequest) -> anyhow::Result<AssistantResponse> {
        let mut field_mappings = BTreeMap::new();
        field_mappings.insert("yw_fs".to_string(), "chinese_score".to_string());
        field_mappings.insert("sx_fs".to_string(), "math_score".to_string());
        Ok(AssistantResponse {
            field_mappings,
            structure_guess: Some(TableLayout::Wide),
            confidence: 0.9,
            ..AssistantResponse::default()
        })
    }
}

fn mapping_config(assistant_threshold: f64) -> MappingConfig {
    MappingConfig {
        assistant_threshold,
        ..MappingConfig::default()
    }
}

#[tokio::test]
async fn test_layout_override_skips_detection() {
    let table = SourceTable::from_csv_str(SCENARIO_CSV).unwrap();
    let planner = ImportPlanner::new(&MappingConfig::default());

    let detected = planner
        .plan(Path::new("scores.csv"), &table, &create_test_options())
        .await;
    assert_eq!(detected.layout(), TableLayout::Mixed);
    assert!(detected.structure.requires_user_input);

    let overridden = planner
        .plan(
            Path::new("scores.csv"),
            &table,
            &create_test_options().with_layout(TableLayout::Wide),
        )
        .await;
    assert_eq!(overridden.layout(), TableLayout::Wide);
    assert!(overridden.has_identity_columns());
    assert_eq!(overridden.exam, create_test_exam());
}

#[tokio::test]
async fn test_exam_inferred_from_file_name() {
    let table = SourceTable::from_csv_str(LONG_CSV).unwrap();
    let planner = ImportPlanner::new(&MappingConfig::default());

    let plan = planner
        .plan(
            Path::new("/data/2024-03-15高一期中考试.csv"),
            &table,
            &ImportOptions::default(),
        )
        .await;

    assert_eq!(plan.exam.title, "2024-03-15高一期中考试");
    assert_eq!(plan.exam.exam_type.as_deref(), Some("midterm"));
    assert!(
        plan.warnings
            .iter()
            .any(|w| w.contains("inferred from the file name"))
    );
}

#[tokio::test]
async fn test_unmapped_headers_are_reported_with_samples() {
    let table =
        SourceTable::from_csv_str("姓名,班级,科目,分数,备注\n张三,高一1班,语文,90,转学生\n")
            .unwrap();
    let planner = ImportPlanner::new(&MappingConfig::default());

    let plan = planner
        .plan(Path::new("scores.csv"), &table, &create_test_options())
        .await;

    assert_eq!(plan.layout(), TableLayout::Long);
    assert_eq!(
        plan.unknown_fields.get("备注"),
        Some(&vec!["转学生".to_string()])
    );
    assert!(
        plan.warnings
            .iter()
            .any(|w| w == "Unmapped header '备注' kept as extra data")
    );
}

#[tokio::test]
async fn test_assistant_consulted_below_threshold() {
    let table = SourceTable::from_csv_str("学号,姓名,班级,yw_fs,sx_fs\n1,张三,高一1班,90,95\n")
        .unwrap();
    let planner =
        ImportPlanner::new(&mapping_config(0.99)).with_assistant(Arc::new(PinyinAssistant));

    let plan = planner
        .plan(Path::new("scores.csv"), &table, &create_test_options())
        .await;

    assert!(plan.assistant_consulted);
    assert!(plan.analysis.has_field(CanonicalField::Subject(
        SubjectKind::Chinese,
        AttributeKind::Score
    )));
    assert!(
        plan.suggestions
            .iter()
            .any(|s| s == "Mapping assistant suggests the wide layout")
    );
}

#[tokio::test]
async fn test_assistant_not_consulted_when_confident() {
    let table = SourceTable::from_csv_str("学号,姓名,班级,yw_fs,sx_fs\n1,张三,高一1班,90,95\n")
        .unwrap();
    let planner =
        ImportPlanner::new(&mapping_config(0.0)).with_assistant(Arc::new(PinyinAssistant));

    let plan = planner
        .plan(Path::new("scores.csv"), &table, &create_test_options())
        .await;

    assert!(!plan.assistant_consulted);
    assert!(!plan.analysis.has_field(CanonicalField::Subject(
        SubjectKind::Chinese,
        AttributeKind::Score
    )));
}

#[tokio::test]
async fn test_confirm_remembers_mappings() {
    let table = SourceTable::from_csv_str(LONG_CSV).unwrap();
    let memory = Arc::new(MappingMemory::with_ttl_secs(3600));
    let planner = ImportPlanner::new(&MappingConfig::default()).with_memory(memory.clone());

    let plan = planner
        .plan(Path::new("scores.csv"), &table, &create_test_options())
        .await;
    let stored = planner.confirm(&plan);

    assert_eq!(stored, 4);
    assert_eq!(memory.len(), 4);
    assert_eq!(ImportPlanner::new(&MappingConfig::default()).confirm(&plan), 0);
}
