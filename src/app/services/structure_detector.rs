//! Table layout detection from mapped headers
//!
//! The layout is decided from the header analysis alone. Sample rows only
//! refine the confidence of a long classification; file names are never
//! consulted.

use crate::app::models::{CanonicalField, RawRecord, SubjectKind, TableLayout};
use crate::app::services::field_mapper::{HeaderAnalysis, normalize_header};
use crate::constants::{DEFAULT_SAMPLE_SIZE, DEFAULT_WIDE_SUBJECT_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Layout decision with the evidence behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureReport {
    pub layout: TableLayout,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub requires_user_input: bool,
    pub suggestions: Vec<String>,

    /// Score-class subject headers, total excluded
    pub subject_columns: usize,
}

impl StructureReport {
    /// Report for a layout chosen by the operator
    pub fn overridden(layout: TableLayout) -> Self {
        Self {
            layout,
            confidence: 1.0,
            evidence: vec![format!("Layout set to {} by the operator", layout)],
            requires_user_input: false,
            suggestions: Vec::new(),
            subject_columns: 0,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} layout (confidence {:.2}, {} subject columns)",
            self.layout, self.confidence, self.subject_columns
        )
    }
}

/// Classifies a table as wide, long, or mixed
#[derive(Debug, Clone)]
pub struct StructureDetector {
    wide_threshold: usize,
    sample_size: usize,
}

impl Default for StructureDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WIDE_SUBJECT_THRESHOLD, DEFAULT_SAMPLE_SIZE)
    }
}

impl StructureDetector {
    pub fn new(wide_threshold: usize, sample_size: usize) -> Self {
        Self {
            wide_threshold,
            sample_size,
        }
    }

    /// Classify the table
    ///
    /// # Arguments
    ///
    /// * `analysis` - Header analysis of the file
    /// * `rows` - Data rows; only the first `sample_size` are inspected
    pub fn detect(&self, analysis: &HeaderAnalysis, rows: &[RawRecord]) -> StructureReport {
        let subject_columns = analysis.score_column_count(false);
        let score_columns = analysis.score_column_count(true);
        let subject_header = analysis.header_for(CanonicalField::SubjectName);
        let sample = &rows[..rows.len().min(self.sample_size)];

        let report = if subject_columns > self.wide_threshold {
            let excess = (subject_columns - self.wide_threshold) as f64;
            StructureReport {
                layout: TableLayout::Wide,
                confidence: (0.8 + 0.05 * excess).min(0.98),
                evidence: vec![format!(
                    "{} subject score columns exceed the wide threshold of {}",
                    subject_columns, self.wide_threshold
                )],
                requires_user_input: false,
                suggestions: Vec::new(),
                subject_columns,
            }
        } else if let Some(header) = subject_header.filter(|_| score_columns <= 1) {
            let mut evidence = vec![format!(
                "Subject column '{}' with {} score column(s)",
                header, score_columns
            )];
            let mut confidence = 0.85;
            if let Some(note) = subject_column_evidence(header, sample) {
                evidence.push(note);
                confidence += 0.1;
            }
            StructureReport {
                layout: TableLayout::Long,
                confidence,
                evidence,
                requires_user_input: false,
                suggestions: Vec::new(),
                subject_columns,
            }
        } else {
            StructureReport {
                layout: TableLayout::Mixed,
                confidence: 0.3,
                evidence: vec![format!(
                    "{} subject score columns, subject column {}",
                    subject_columns,
                    if subject_header.is_some() {
                        "present"
                    } else {
                        "absent"
                    }
                )],
                requires_user_input: true,
                suggestions: vec![
                    format!(
                        "Detected {} subject columns, expected either >{} for wide or a subject column for long",
                        subject_columns, self.wide_threshold
                    ),
                    "Retry with --layout wide or --layout long".to_string(),
                ],
                subject_columns,
            }
        };

        debug!("Structure detection: {}", report.summary());
        report
    }
}

/// Note when the subject column looks like a real long-format key
fn subject_column_evidence(header: &str, sample: &[RawRecord]) -> Option<String> {
    let values: Vec<String> = sample
        .iter()
        .filter_map(|row| row.get(header))
        .map(normalize_header)
        .filter(|value| !value.is_empty())
        .collect();
    if values.is_empty() {
        return None;
    }

    let distinct: HashSet<&String> = values.iter().collect();
    if distinct.len() < values.len() {
        return Some(format!(
            "Subject values repeat across sampled rows ({} distinct in {})",
            distinct.len(),
            values.len()
        ));
    }
    let recognised = values
        .iter()
        .filter(|value| SubjectKind::from_normalized_name(value).is_some())
        .count();
    (recognised == values.len()).then(|| "All sampled subject values are known subjects".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::services::field_mapper::FieldMapper;

    fn analyze(headers: &[&str]) -> HeaderAnalysis {
        let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        FieldMapper::new().analyze_headers(&headers)
    }

    fn rows(headers: &[&str], values: &[&[&str]]) -> Vec<RawRecord> {
        values
            .iter()
            .enumerate()
            .map(|(index, row)| {
                RawRecord::new(
                    index,
                    headers
                        .iter()
                        .zip(row.iter())
                        .map(|(h, v)| (h.to_string(), v.to_string()))
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_wide_layout() {
        let analysis = analyze(&["学号", "姓名", "班级", "语文", "数学", "英语", "总分"]);
        let report = StructureDetector::default().detect(&analysis, &[]);

        assert_eq!(report.layout, TableLayout::Wide);
        assert_eq!(report.subject_columns, 3);
        assert!((report.confidence - 0.85).abs() < 1e-9);
        assert!(!report.requires_user_input);
    }

    #[test]
    fn test_two_subjects_are_not_wide() {
        let analysis = analyze(&["学号", "姓名", "班级", "语文", "数学", "总分"]);
        let report = StructureDetector::default().detect(&analysis, &[]);

        assert_eq!(report.layout, TableLayout::Mixed);
        assert!(report.requires_user_input);
        assert!(report.suggestions[0].contains("Detected 2 subject columns"));
    }

    #[test]
    fn test_threshold_is_tunable() {
        let analysis = analyze(&["学号", "姓名", "班级", "语文", "数学", "总分"]);
        let report = StructureDetector::new(1, 10).detect(&analysis, &[]);
        assert_eq!(report.layout, TableLayout::Wide);
    }

    #[test]
    fn test_long_layout_confidence_refined_by_samples() {
        let headers = ["姓名", "班级", "科目", "分数"];
        let analysis = analyze(&headers);
        let detector = StructureDetector::default();

        let bare = detector.detect(&analysis, &[]);
        assert_eq!(bare.layout, TableLayout::Long);
        assert!((bare.confidence - 0.85).abs() < 1e-9);

        let sample = rows(
            &headers,
            &[
                &["张三", "1班", "语文", "90"],
                &["张三", "1班", "数学", "95"],
                &["李四", "1班", "语文", "88"],
            ],
        );
        let refined = detector.detect(&analysis, &sample);
        assert_eq!(refined.layout, TableLayout::Long);
        assert!((refined.confidence - 0.95).abs() < 1e-9);
        assert_eq!(refined.evidence.len(), 2);
    }

    #[test]
    fn test_subject_column_with_many_scores_is_mixed() {
        let analysis = analyze(&["姓名", "科目", "分数", "总分"]);
        let report = StructureDetector::default().detect(&analysis, &[]);
        assert_eq!(report.layout, TableLayout::Mixed);
    }

    #[test]
    fn test_override() {
        let report = StructureReport::overridden(TableLayout::Long);
        assert_eq!(report.layout, TableLayout::Long);
        assert!(!report.requires_user_input);
    }
}
