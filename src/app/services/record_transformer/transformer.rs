//! Mapped row to long-form record transformation

use super::numeric::{CellError, parse_grade, parse_rank, parse_score};
use crate::app::models::{
    AttributeKind, CanonicalField, ExamInfo, IdentityCandidate, LongFormGradeRecord, RawRecord,
    StudentIdentity, SubjectKind, TableLayout,
};
use crate::app::services::exam_inference::infer_exam_date;
use crate::app::services::field_mapper::normalize::non_empty;
use crate::app::services::field_mapper::{HeaderAnalysis, normalize_header};
use crate::config::ImportConfig;
use crate::constants::DEFAULT_SUBJECT_MAX_SCORE;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Non-fatal observation about one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RowWarning {
    /// Identity present but no subject carried a usable value
    NoUsableScores,
    /// Exam date column held something that is not a date
    InvalidExamDate { value: String },
    /// Long-format subject text outside the subject vocabulary, kept verbatim
    UnknownSubject { value: String },
}

impl fmt::Display for RowWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowWarning::NoUsableScores => {
                f.write_str("NoUsableScores: row has no usable subject data")
            }
            RowWarning::InvalidExamDate { value } => {
                write!(f, "InvalidExamDate: '{}' is not a date", value)
            }
            RowWarning::UnknownSubject { value } => {
                write!(f, "UnknownSubject: '{}' kept verbatim", value)
            }
        }
    }
}

/// Attributes collected for one subject of one row
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectEntry {
    /// Display name, or the source text for unknown long-format subjects
    pub subject: String,
    pub kind: Option<SubjectKind>,
    pub score: Option<f64>,
    pub grade: Option<String>,
    pub class_rank: Option<u32>,
    pub grade_rank: Option<u32>,
}

impl SubjectEntry {
    pub fn new(subject: impl Into<String>, kind: Option<SubjectKind>) -> Self {
        Self {
            subject: subject.into(),
            kind,
            score: None,
            grade: None,
            class_rank: None,
            grade_rank: None,
        }
    }

    fn for_kind(kind: SubjectKind) -> Self {
        Self::new(kind.display_name(), Some(kind))
    }

    /// Parse one cell into the attribute it was mapped to
    fn set(
        &mut self,
        attribute: AttributeKind,
        raw: &str,
        max: f64,
    ) -> std::result::Result<(), CellError> {
        match attribute {
            AttributeKind::Score => {
                if let Some(score) = parse_score(raw, max)? {
                    self.score = Some(score);
                }
            }
            AttributeKind::Grade => {
                if let Some(grade) = parse_grade(raw) {
                    self.grade = Some(grade);
                }
            }
            AttributeKind::ClassRank => {
                if let Some(rank) = parse_rank(raw)? {
                    self.class_rank = Some(rank);
                }
            }
            AttributeKind::GradeRank => {
                if let Some(rank) = parse_rank(raw)? {
                    self.grade_rank = Some(rank);
                }
            }
        }
        Ok(())
    }

    pub fn has_payload(&self) -> bool {
        self.score.is_some()
            || self.grade.is_some()
            || self.class_rank.is_some()
            || self.grade_rank.is_some()
    }
}

/// Everything extracted from one source row, before identity resolution
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRow {
    pub index: usize,
    pub candidate: IdentityCandidate,
    pub exam: ExamInfo,

    /// One entry per subject with at least one populated attribute
    pub entries: Vec<SubjectEntry>,

    /// Non-empty unmapped cells, carried verbatim on every record
    pub extra: BTreeMap<String, String>,

    pub warnings: Vec<RowWarning>,
}

impl TransformedRow {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attach the resolved identity and produce the long-form records
    pub fn into_records(
        self,
        identity: &StudentIdentity,
        imported_at: DateTime<Utc>,
    ) -> Vec<LongFormGradeRecord> {
        let Self {
            index,
            exam,
            entries,
            extra,
            ..
        } = self;
        entries
            .into_iter()
            .map(|entry| LongFormGradeRecord {
                identity: identity.clone(),
                exam: exam.clone(),
                subject: entry.subject,
                score: entry.score,
                grade: entry.grade,
                class_rank: entry.class_rank,
                grade_rank: entry.grade_rank,
                source_index: index,
                imported_at,
                extra: extra.clone(),
            })
            .collect()
    }
}

/// Explodes mapped rows into per-subject entries
///
/// Built once per file from its header analysis. In wide layout every subject
/// column group becomes an entry and subject-less attribute columns belong to
/// the total. In long layout the subject column names the single entry and
/// subject-less attribute columns belong to it. A mixed layout is read as
/// wide.
#[derive(Debug, Clone)]
pub struct RecordTransformer {
    layout: TableLayout,
    student_id: Option<String>,
    name: Option<String>,
    class_name: Option<String>,
    exam_title: Option<String>,
    exam_type: Option<String>,
    exam_date: Option<String>,
    subject_name: Option<String>,
    subject_columns: Vec<(String, SubjectKind, AttributeKind)>,
    generic_columns: Vec<(String, AttributeKind)>,
    extra_columns: Vec<String>,
    score_limits: BTreeMap<SubjectKind, f64>,
}

impl RecordTransformer {
    pub fn new(analysis: &HeaderAnalysis, layout: TableLayout, import: &ImportConfig) -> Self {
        let header = |field: CanonicalField| analysis.header_for(field).map(str::to_string);

        let mut subject_columns = Vec::new();
        let mut generic_columns = Vec::new();
        for mapping in &analysis.mappings {
            match mapping.field() {
                Some(CanonicalField::Subject(subject, attribute)) => {
                    subject_columns.push((mapping.header.clone(), subject, attribute));
                }
                Some(CanonicalField::Generic(attribute)) => {
                    generic_columns.push((mapping.header.clone(), attribute));
                }
                _ => {}
            }
        }

        Self {
            layout,
            student_id: header(CanonicalField::StudentId),
            name: header(CanonicalField::Name),
            class_name: header(CanonicalField::ClassName),
            exam_title: header(CanonicalField::ExamTitle),
            exam_type: header(CanonicalField::ExamType),
            exam_date: header(CanonicalField::ExamDate),
            subject_name: header(CanonicalField::SubjectName),
            subject_columns,
            generic_columns,
            extra_columns: analysis.unmapped.clone(),
            score_limits: SubjectKind::ALL
                .into_iter()
                .map(|subject| (subject, import.max_score(subject)))
                .collect(),
        }
    }

    pub fn layout(&self) -> TableLayout {
        self.layout
    }

    /// Whether the file carries its own exam title column
    pub fn has_exam_columns(&self) -> bool {
        self.exam_title.is_some()
    }

    /// Transform one row
    ///
    /// # Arguments
    ///
    /// * `row` - Source row
    /// * `exam` - Exam used where the row has no exam columns of its own
    ///
    /// # Errors
    ///
    /// `IdentityResolution` when the row has neither name nor student id,
    /// `DataValidation` when a score or rank cell cannot be used. Both are
    /// recoverable and fail only this row.
    pub fn transform(&self, row: &RawRecord, exam: &ExamInfo) -> Result<TransformedRow> {
        let candidate = self.candidate(row);
        if !candidate.is_resolvable() {
            return Err(Error::identity_resolution(format!(
                "Row {}: no student name or student id",
                row.index
            )));
        }

        let mut warnings = Vec::new();
        let exam = self.exam_for(row, exam, &mut warnings);
        let mut extra = self.extra_cells(row);

        let entries = match self.layout {
            TableLayout::Long => self.long_entries(row, &mut extra, &mut warnings)?,
            TableLayout::Wide | TableLayout::Mixed => self.wide_entries(row)?,
        };
        let entries: Vec<SubjectEntry> = entries
            .into_iter()
            .filter(|entry| entry.has_payload())
            .collect();
        if entries.is_empty() {
            warnings.push(RowWarning::NoUsableScores);
        }

        Ok(TransformedRow {
            index: row.index,
            candidate,
            exam,
            entries,
            extra,
            warnings,
        })
    }

    /// Identity cells of a row
    pub fn candidate(&self, row: &RawRecord) -> IdentityCandidate {
        IdentityCandidate {
            student_id: cell(row, &self.student_id),
            name: cell(row, &self.name),
            class_name: cell(row, &self.class_name),
        }
    }

    /// (header, raw value) of the identity columns the file has
    pub fn identity_cells(&self, row: &RawRecord) -> Vec<(String, String)> {
        [&self.student_id, &self.name, &self.class_name]
            .into_iter()
            .flatten()
            .map(|header| {
                let raw = row.get(header).unwrap_or_default();
                (header.clone(), raw.to_string())
            })
            .collect()
    }

    fn exam_for(
        &self,
        row: &RawRecord,
        default: &ExamInfo,
        warnings: &mut Vec<RowWarning>,
    ) -> ExamInfo {
        let mut exam = default.clone();
        if let Some(title) = cell(row, &self.exam_title) {
            exam.title = title;
        }
        if let Some(exam_type) = cell(row, &self.exam_type) {
            exam.exam_type = Some(exam_type);
        }
        if let Some(value) = cell(row, &self.exam_date) {
            match parse_exam_date(&value) {
                Some(date) => exam.date = Some(date),
                None => warnings.push(RowWarning::InvalidExamDate { value }),
            }
        }
        exam
    }

    fn extra_cells(&self, row: &RawRecord) -> BTreeMap<String, String> {
        self.extra_columns
            .iter()
            .filter_map(|header| {
                let value = row.get(header)?.trim();
                (!value.is_empty()).then(|| (header.clone(), value.to_string()))
            })
            .collect()
    }

    fn max_score(&self, kind: Option<SubjectKind>) -> f64 {
        kind.and_then(|kind| self.score_limits.get(&kind).copied())
            .unwrap_or(DEFAULT_SUBJECT_MAX_SCORE)
    }

    fn wide_entries(&self, row: &RawRecord) -> Result<Vec<SubjectEntry>> {
        let mut entries: BTreeMap<SubjectKind, SubjectEntry> = BTreeMap::new();
        let mut failures = Vec::new();

        let columns = self
            .subject_columns
            .iter()
            .map(|(header, subject, attribute)| (header, *subject, *attribute))
            .chain(
                self.generic_columns
                    .iter()
                    .map(|(header, attribute)| (header, SubjectKind::Total, *attribute)),
            );
        for (header, subject, attribute) in columns {
            let Some(raw) = row.get(header) else {
                continue;
            };
            let max = self.max_score(Some(subject));
            let entry = entries
                .entry(subject)
                .or_insert_with(|| SubjectEntry::for_kind(subject));
            if let Err(error) = entry.set(attribute, raw, max) {
                failures.push(CellFailure::new(header, raw, error));
            }
        }

        reject_failures(row, failures)?;
        Ok(entries.into_values().collect())
    }

    fn long_entries(
        &self,
        row: &RawRecord,
        extra: &mut BTreeMap<String, String>,
        warnings: &mut Vec<RowWarning>,
    ) -> Result<Vec<SubjectEntry>> {
        let Some(text) = cell(row, &self.subject_name) else {
            let header = self.subject_name.clone().unwrap_or_default();
            return Err(Error::invalid_cells(
                format!("Row {}: subject column is empty", row.index),
                vec![(header, String::new())],
            ));
        };
        let kind = SubjectKind::from_normalized_name(&normalize_header(&text));
        let mut entry = match kind {
            Some(kind) => SubjectEntry::for_kind(kind),
            None => {
                warnings.push(RowWarning::UnknownSubject {
                    value: text.clone(),
                });
                SubjectEntry::new(text, None)
            }
        };

        let max = self.max_score(kind);
        let mut failures = Vec::new();
        for (header, attribute) in &self.generic_columns {
            if let Some(raw) = row.get(header) {
                if let Err(error) = entry.set(*attribute, raw, max) {
                    failures.push(CellFailure::new(header, raw, error));
                }
            }
        }
        for (header, subject, attribute) in &self.subject_columns {
            let Some(raw) = row.get(header) else {
                continue;
            };
            if Some(*subject) == kind {
                if let Err(error) = entry.set(*attribute, raw, max) {
                    failures.push(CellFailure::new(header, raw, error));
                }
            } else if !raw.trim().is_empty() {
                // Another subject's column on a long row has no record to land in
                extra.insert(header.clone(), raw.trim().to_string());
            }
        }

        reject_failures(row, failures)?;
        Ok(vec![entry])
    }
}

fn cell(row: &RawRecord, header: &Option<String>) -> Option<String> {
    header
        .as_deref()
        .and_then(|header| row.get(header))
        .and_then(non_empty)
}

/// A cell that could not be read as the attribute it was mapped to
struct CellFailure {
    header: String,
    raw: String,
    error: CellError,
}

impl CellFailure {
    fn new(header: &str, raw: &str, error: CellError) -> Self {
        Self {
            header: header.to_string(),
            raw: raw.to_string(),
            error,
        }
    }
}

fn reject_failures(row: &RawRecord, failures: Vec<CellFailure>) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    let reasons = failures
        .iter()
        .map(|failure| format!("column '{}': {}", failure.header, failure.error))
        .collect::<Vec<_>>()
        .join("; ");
    let cells = failures
        .into_iter()
        .map(|failure| (failure.header, failure.raw))
        .collect();
    Err(Error::invalid_cells(
        format!("Row {}: {}", row.index, reasons),
        cells,
    ))
}

/// Exam date cell: the file-name date forms plus compact `YYYYMMDD`
fn parse_exam_date(value: &str) -> Option<NaiveDate> {
    infer_exam_date(value).or_else(|| NaiveDate::parse_from_str(value.trim(), "%Y%m%d").ok())
}
