//! Inspect command: preview how a file would be read

use super::shared::print_json;
use crate::Result;
use crate::app::models::task::ImportOptions;
use crate::app::models::{ExamInfo, FieldMapping, MappingSource};
use crate::app::services::import_task::{ImportPlan, ImportPlanner};
use crate::app::services::source_reader::read_source_async;
use crate::app::services::structure_detector::StructureReport;
use crate::cli::args::{Args, InspectArgs, OutputFormat};
use crate::config::Config;
use colored::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// What an import would decide about a file, without touching any store
#[derive(Debug, Serialize)]
pub struct InspectionReport {
    pub file: String,
    pub rows: usize,
    pub mappings: Vec<FieldMapping>,
    pub confidence: f64,
    pub structure: StructureReport,
    pub exam: ExamInfo,
    pub identity_columns: bool,
    pub unknown_fields: BTreeMap<String, Vec<String>>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl InspectionReport {
    pub fn from_plan(file: &Path, rows: usize, plan: ImportPlan) -> Self {
        let identity_columns = plan.has_identity_columns();
        Self {
            file: file.display().to_string(),
            rows,
            confidence: plan.analysis.confidence,
            mappings: plan.analysis.mappings,
            structure: plan.structure,
            exam: plan.exam,
            identity_columns,
            unknown_fields: plan.unknown_fields,
            warnings: plan.warnings,
            suggestions: plan.suggestions,
        }
    }
}

pub async fn run_inspect(args: &Args, inspect_args: &InspectArgs, config: Config) -> Result<()> {
    let report = inspect_file(&inspect_args.file, inspect_args, &config).await?;
    match args.output_format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Human => {
            print_report(&report);
            Ok(())
        }
    }
}

pub async fn inspect_file(
    file: &Path,
    inspect_args: &InspectArgs,
    config: &Config,
) -> Result<InspectionReport> {
    let table = read_source_async(file).await?;
    info!("Read {} rows from {}", table.row_count(), file.display());

    let mut options = ImportOptions::default();
    if let Some(layout) = inspect_args.layout {
        options = options.with_layout(layout);
    }
    let plan = ImportPlanner::new(&config.mapping)
        .plan(file, &table, &options)
        .await;
    Ok(InspectionReport::from_plan(file, table.row_count(), plan))
}

fn source_label(source: MappingSource) -> &'static str {
    match source {
        MappingSource::Heuristic => "rule",
        MappingSource::Assistant => "assistant",
        MappingSource::Cache => "memory",
    }
}

fn print_report(report: &InspectionReport) {
    println!("{} ({} rows)", report.file.bold(), report.rows);
    println!();

    let width = report
        .mappings
        .iter()
        .map(|m| m.header.chars().count())
        .max()
        .unwrap_or(6)
        .max(6);
    println!("{}", "Header mapping".bold());
    for mapping in &report.mappings {
        let padding = width - mapping.header.chars().count();
        let target = match mapping.target.field() {
            Some(field) => field.to_string().green(),
            None => "unmapped".yellow(),
        };
        println!(
            "  {}{}  ->  {:<16} {:.2}  {} ({})",
            mapping.header,
            " ".repeat(padding),
            target,
            mapping.confidence,
            mapping.rule.dimmed(),
            source_label(mapping.source)
        );
    }
    println!("  Overall confidence {:.2}", report.confidence);
    println!();

    let structure = &report.structure;
    let summary = if structure.requires_user_input {
        structure.summary().red()
    } else {
        structure.summary().green()
    };
    println!("{} {}", "Structure".bold(), summary);
    for evidence in &structure.evidence {
        println!("  - {}", evidence);
    }

    println!();
    println!("{} {}", "Exam".bold(), report.exam.title);
    if !report.identity_columns {
        println!("  {}", "No name or student id column found".red());
    }

    if !report.unknown_fields.is_empty() {
        println!();
        println!("{}", "Unmapped columns".bold());
        for (header, samples) in &report.unknown_fields {
            println!("  {}: {}", header, samples.join(", "));
        }
    }

    for warning in &report.warnings {
        println!("{} {}", "warning:".yellow(), warning);
    }
    for suggestion in structure.suggestions.iter().chain(&report.suggestions) {
        println!("{} {}", "hint:".cyan(), suggestion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::{CanonicalField, TableLayout};
    use tempfile::TempDir;

    fn inspect_args(file: &Path, layout: Option<TableLayout>) -> InspectArgs {
        InspectArgs {
            file: file.to_path_buf(),
            layout,
        }
    }

    #[tokio::test]
    async fn test_inspect_maps_headers_without_importing() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("高一期中考试.csv");
        std::fs::write(
            &file,
            "学号,姓名,班级,语文,数学,英语,总分,备注\n\
             2024001,张三,高一1班,85,92,88,265,转学\n",
        )
        .unwrap();

        let report = inspect_file(&file, &inspect_args(&file, None), &Config::default())
            .await
            .unwrap();

        assert_eq!(report.rows, 1);
        assert!(report.identity_columns);
        assert_eq!(report.structure.layout, TableLayout::Wide);
        assert_eq!(report.exam.title, "高一期中考试");
        assert_eq!(
            report.mappings[0].target.field(),
            Some(CanonicalField::StudentId)
        );
        assert_eq!(
            report.unknown_fields.get("备注"),
            Some(&vec!["转学".to_string()])
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["structure"]["layout"], "wide");
    }

    #[tokio::test]
    async fn test_inspect_honors_layout_override() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("scores.csv");
        std::fs::write(&file, "学号,姓名,班级,语文,数学,总分\n2024001,张三,高一1班,85,92,177\n")
            .unwrap();

        let detected = inspect_file(&file, &inspect_args(&file, None), &Config::default())
            .await
            .unwrap();
        assert_eq!(detected.structure.layout, TableLayout::Mixed);
        assert!(detected.structure.requires_user_input);

        let forced = inspect_file(
            &file,
            &inspect_args(&file, Some(TableLayout::Wide)),
            &Config::default(),
        )
        .await
        .unwrap();
        assert_eq!(forced.structure.layout, TableLayout::Wide);
        assert!(!forced.structure.requires_user_input);
    }
}
