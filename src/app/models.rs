//! Data models for grade import
//!
//! This module contains the core data structures shared by every stage of the
//! import pipeline: the closed set of canonical fields that free-form headers
//! map onto, raw and normalized records, student identities, and the
//! percentile grade level configuration used by derived statistics.

pub mod task;

use crate::constants::{self, SUBJECT_ABBREVIATIONS, SUBJECT_ALIASES};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Canonical Field Vocabulary
// =============================================================================

/// Subjects recognised by the importer, including the aggregate total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Chinese,
    Math,
    English,
    Physics,
    Chemistry,
    Biology,
    Politics,
    History,
    Geography,
    Total,
}

impl SubjectKind {
    pub const ALL: [SubjectKind; 10] = [
        SubjectKind::Chinese,
        SubjectKind::Math,
        SubjectKind::English,
        SubjectKind::Physics,
        SubjectKind::Chemistry,
        SubjectKind::Biology,
        SubjectKind::Politics,
        SubjectKind::History,
        SubjectKind::Geography,
        SubjectKind::Total,
    ];

    /// Stable key used in canonical field names (`chinese_score`)
    pub fn key(self) -> &'static str {
        match self {
            SubjectKind::Chinese => "chinese",
            SubjectKind::Math => "math",
            SubjectKind::English => "english",
            SubjectKind::Physics => "physics",
            SubjectKind::Chemistry => "chemistry",
            SubjectKind::Biology => "biology",
            SubjectKind::Politics => "politics",
            SubjectKind::History => "history",
            SubjectKind::Geography => "geography",
            SubjectKind::Total => "total",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|subject| subject.key() == key)
    }

    /// Normalized header aliases; the first one is the display name
    pub fn aliases(self) -> &'static [&'static str] {
        SUBJECT_ALIASES
            .iter()
            .find(|(key, _)| *key == self.key())
            .map(|(_, aliases)| *aliases)
            .unwrap_or(&[])
    }

    pub fn abbreviation(self) -> &'static str {
        SUBJECT_ABBREVIATIONS
            .iter()
            .find(|(key, _)| *key == self.key())
            .map(|(_, abbreviation)| *abbreviation)
            .unwrap_or("")
    }

    /// Subject name as written in long-form records ("语文", "总分")
    pub fn display_name(self) -> &'static str {
        self.aliases().first().copied().unwrap_or_else(|| self.key())
    }

    /// Resolve a normalized subject name from a long-format subject column
    pub fn from_normalized_name(normalized: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|subject| {
            subject.aliases().contains(&normalized) || subject.abbreviation() == normalized
        })
    }

    pub fn is_total(self) -> bool {
        self == SubjectKind::Total
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Per-subject attribute carried by a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Score,
    Grade,
    ClassRank,
    GradeRank,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 4] = [
        AttributeKind::Score,
        AttributeKind::Grade,
        AttributeKind::ClassRank,
        AttributeKind::GradeRank,
    ];

    pub fn key(self) -> &'static str {
        match self {
            AttributeKind::Score => "score",
            AttributeKind::Grade => "grade",
            AttributeKind::ClassRank => "class_rank",
            AttributeKind::GradeRank => "grade_rank",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|attribute| attribute.key() == key)
    }

    /// Rank attributes hold positive integers
    pub fn is_rank(self) -> bool {
        matches!(self, AttributeKind::ClassRank | AttributeKind::GradeRank)
    }
}

/// The closed set of targets a source header can map onto
///
/// `Generic` attributes belong to whatever subject the row names: in a long
/// table that is the subject column, in a wide table it is the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CanonicalField {
    StudentId,
    Name,
    ClassName,
    Subject(SubjectKind, AttributeKind),
    Generic(AttributeKind),
    SubjectName,
    ExamTitle,
    ExamType,
    ExamDate,
}

impl CanonicalField {
    /// Canonical textual key ("student_id", "math_class_rank", "score")
    pub fn key(&self) -> String {
        match self {
            CanonicalField::StudentId => "student_id".to_string(),
            CanonicalField::Name => "name".to_string(),
            CanonicalField::ClassName => "class_name".to_string(),
            CanonicalField::Subject(subject, attribute) => {
                format!("{}_{}", subject.key(), attribute.key())
            }
            CanonicalField::Generic(attribute) => attribute.key().to_string(),
            CanonicalField::SubjectName => "subject".to_string(),
            CanonicalField::ExamTitle => "exam_title".to_string(),
            CanonicalField::ExamType => "exam_type".to_string(),
            CanonicalField::ExamDate => "exam_date".to_string(),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(
            self,
            CanonicalField::StudentId | CanonicalField::Name | CanonicalField::ClassName
        )
    }

    pub fn is_exam_metadata(&self) -> bool {
        matches!(
            self,
            CanonicalField::ExamTitle | CanonicalField::ExamType | CanonicalField::ExamDate
        )
    }

    /// Score columns drive layout classification
    pub fn is_score_class(&self) -> bool {
        matches!(
            self,
            CanonicalField::Subject(_, AttributeKind::Score)
                | CanonicalField::Generic(AttributeKind::Score)
        )
    }

    pub fn subject(&self) -> Option<SubjectKind> {
        match self {
            CanonicalField::Subject(subject, _) => Some(*subject),
            _ => None,
        }
    }

    pub fn attribute(&self) -> Option<AttributeKind> {
        match self {
            CanonicalField::Subject(_, attribute) | CanonicalField::Generic(attribute) => {
                Some(*attribute)
            }
            _ => None,
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for CanonicalField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase();
        let field = match key.as_str() {
            "student_id" => CanonicalField::StudentId,
            "name" => CanonicalField::Name,
            "class_name" => CanonicalField::ClassName,
            "subject" => CanonicalField::SubjectName,
            "exam_title" => CanonicalField::ExamTitle,
            "exam_type" => CanonicalField::ExamType,
            "exam_date" => CanonicalField::ExamDate,
            other => {
                if let Some(attribute) = AttributeKind::from_key(other) {
                    return Ok(CanonicalField::Generic(attribute));
                }
                SubjectKind::ALL
                    .into_iter()
                    .find_map(|subject| {
                        other
                            .strip_prefix(subject.key())
                            .and_then(|rest| rest.strip_prefix('_'))
                            .and_then(AttributeKind::from_key)
                            .map(|attribute| CanonicalField::Subject(subject, attribute))
                    })
                    .ok_or_else(|| {
                        Error::data_validation(format!("Unknown canonical field: '{}'", s))
                    })?
            }
        };
        Ok(field)
    }
}

impl From<CanonicalField> for String {
    fn from(field: CanonicalField) -> Self {
        field.key()
    }
}

impl TryFrom<String> for CanonicalField {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

// =============================================================================
// Field Mapping
// =============================================================================

/// Where a header is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderTarget {
    Field(CanonicalField),
    Unmapped,
}

impl HeaderTarget {
    pub fn field(&self) -> Option<CanonicalField> {
        match self {
            HeaderTarget::Field(field) => Some(*field),
            HeaderTarget::Unmapped => None,
        }
    }
}

impl fmt::Display for HeaderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderTarget::Field(field) => write!(f, "{}", field),
            HeaderTarget::Unmapped => f.write_str("unmapped"),
        }
    }
}

/// Which resolver produced a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    Heuristic,
    Assistant,
    /// Reused from a mapping remembered by an earlier import
    Cache,
}

/// Decision for one source header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Header exactly as it appeared in the source
    pub header: String,

    /// Normalized form used for matching
    pub normalized: String,

    pub target: HeaderTarget,

    /// Confidence in [0, 1]; zero for unmapped headers
    pub confidence: f64,

    /// Identifier of the rule that produced the decision
    pub rule: String,

    pub source: MappingSource,
}

impl FieldMapping {
    pub fn mapped(
        header: impl Into<String>,
        normalized: impl Into<String>,
        field: CanonicalField,
        confidence: f64,
        rule: impl Into<String>,
    ) -> Self {
        Self {
            header: header.into(),
            normalized: normalized.into(),
            target: HeaderTarget::Field(field),
            confidence: confidence.clamp(0.0, 1.0),
            rule: rule.into(),
            source: MappingSource::Heuristic,
        }
    }

    pub fn unmapped(
        header: impl Into<String>,
        normalized: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self {
            header: header.into(),
            normalized: normalized.into(),
            target: HeaderTarget::Unmapped,
            confidence: 0.0,
            rule: rule.into(),
            source: MappingSource::Heuristic,
        }
    }

    pub fn with_source(mut self, source: MappingSource) -> Self {
        self.source = source;
        self
    }

    pub fn field(&self) -> Option<CanonicalField> {
        self.target.field()
    }

    pub fn is_mapped(&self) -> bool {
        self.field().is_some()
    }
}

/// Table shape as seen by the structure detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLayout {
    /// One row per student, one column group per subject
    Wide,
    /// One row per (student, subject)
    Long,
    /// Neither shape could be established
    Mixed,
}

impl fmt::Display for TableLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableLayout::Wide => f.write_str("wide"),
            TableLayout::Long => f.write_str("long"),
            TableLayout::Mixed => f.write_str("mixed"),
        }
    }
}

impl FromStr for TableLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "wide" => Ok(TableLayout::Wide),
            "long" => Ok(TableLayout::Long),
            "mixed" => Ok(TableLayout::Mixed),
            other => Err(Error::configuration(format!(
                "Unknown table layout '{}'. Expected wide, long, or mixed",
                other
            ))),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// One source row with its original headers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Zero-based position among the data rows of the source
    pub index: usize,

    /// (header, cell) pairs in source column order
    pub cells: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new(index: usize, cells: Vec<(String, String)>) -> Self {
        Self { index, cells }
    }

    /// Cell value for a header, if the row has that column
    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == header)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, value)| value.trim().is_empty())
    }
}

/// Exam a record belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExamInfo {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl ExamInfo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            exam_type: None,
            date: None,
        }
    }

    pub fn with_type(mut self, exam_type: impl Into<String>) -> Self {
        self.exam_type = Some(exam_type.into());
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Stable identifier of the exam: title plus date when known
    pub fn key(&self) -> String {
        match self.date {
            Some(date) => format!("{}@{}", self.title, date),
            None => self.title.clone(),
        }
    }
}

impl Default for ExamInfo {
    fn default() -> Self {
        Self::new("untitled")
    }
}

/// Identity fields as read from a row, before resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityCandidate {
    pub student_id: Option<String>,
    pub name: Option<String>,
    pub class_name: Option<String>,
}

impl IdentityCandidate {
    /// A candidate needs an id or a name to be resolvable
    pub fn is_resolvable(&self) -> bool {
        self.student_id.is_some() || self.name.is_some()
    }

    /// Id shown for the row in error reports: the student id, else the name
    pub fn record_id(&self) -> Option<&str> {
        self.student_id.as_deref().or(self.name.as_deref())
    }

    pub fn describe(&self) -> String {
        format!(
            "id={} name={} class={}",
            self.student_id.as_deref().unwrap_or("-"),
            self.name.as_deref().unwrap_or("-"),
            self.class_name.as_deref().unwrap_or("-")
        )
    }
}

/// Resolved student identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudentIdentity {
    pub student_id: String,
    pub name: String,
    pub class_name: String,

    /// True when the id was generated by the importer
    #[serde(default)]
    pub minted: bool,
}

impl StudentIdentity {
    pub fn new(
        student_id: impl Into<String>,
        name: impl Into<String>,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            name: name.into(),
            class_name: class_name.into(),
            minted: false,
        }
    }
}

/// How an identity was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Fuzzy,
    New,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Exact => f.write_str("exact"),
            MatchType::Fuzzy => f.write_str("fuzzy"),
            MatchType::New => f.write_str("new"),
        }
    }
}

/// Natural key of a grade record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub student_id: String,
    pub exam: String,
    pub subject: String,
}

/// One normalized grade row: one student, one exam, one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongFormGradeRecord {
    pub identity: StudentIdentity,
    pub exam: ExamInfo,

    /// Subject display name, e.g. "语文" or "总分"
    pub subject: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_rank: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_rank: Option<u32>,

    /// Source row the record came from
    pub source_index: usize,

    pub imported_at: DateTime<Utc>,

    /// Unmapped columns carried along verbatim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl LongFormGradeRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            student_id: self.identity.student_id.clone(),
            exam: self.exam.key(),
            subject: self.subject.clone(),
        }
    }

    /// At least one of score, grade, or a rank must be present
    pub fn has_payload(&self) -> bool {
        self.score.is_some()
            || self.grade.is_some()
            || self.class_rank.is_some()
            || self.grade_rank.is_some()
    }

    pub fn is_total(&self) -> bool {
        self.subject == SubjectKind::Total.display_name()
    }
}

/// Conflict policy for a record whose key already exists in the grade store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Overwrite the stored record with the incoming one
    Replace,
    /// Overlay non-empty incoming fields onto the stored record
    #[default]
    Update,
    /// Keep the stored record untouched
    Skip,
    /// Store the incoming record next to the existing one
    Append,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::Replace => f.write_str("replace"),
            MergeStrategy::Update => f.write_str("update"),
            MergeStrategy::Skip => f.write_str("skip"),
            MergeStrategy::Append => f.write_str("append"),
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(MergeStrategy::Replace),
            "update" => Ok(MergeStrategy::Update),
            "skip" => Ok(MergeStrategy::Skip),
            "append" => Ok(MergeStrategy::Append),
            other => Err(Error::configuration(format!(
                "Unknown merge strategy '{}'. Expected replace, update, skip, or append",
                other
            ))),
        }
    }
}

// =============================================================================
// Grade Level Configuration
// =============================================================================

/// One percentile band within a grade level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeLevel {
    pub code: String,
    pub label: String,

    /// Inclusive lower bound in [0, 1]
    pub min_percentile: f64,

    /// Exclusive upper bound, inclusive for the last band
    pub max_percentile: f64,

    pub color: String,

    #[serde(default)]
    pub description: String,
}

impl GradeLevel {
    pub fn new(
        code: impl Into<String>,
        label: impl Into<String>,
        min_percentile: f64,
        max_percentile: f64,
        color: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            label: label.into(),
            min_percentile,
            max_percentile,
            color: color.into(),
            description: description.into(),
        }
    }
}

/// Ordered partition of the percentile range [0, 1] into labelled bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGradeLevelConfig")]
pub struct GradeLevelConfig {
    pub id: String,
    pub name: String,
    pub levels: Vec<GradeLevel>,

    #[serde(default)]
    pub is_default: bool,
}

#[derive(Deserialize)]
struct RawGradeLevelConfig {
    id: String,
    name: String,
    levels: Vec<GradeLevel>,
    #[serde(default)]
    is_default: bool,
}

impl TryFrom<RawGradeLevelConfig> for GradeLevelConfig {
    type Error = Error;

    fn try_from(raw: RawGradeLevelConfig) -> Result<Self> {
        let mut config = GradeLevelConfig::new(raw.id, raw.name, raw.levels)?;
        config.is_default = raw.is_default;
        Ok(config)
    }
}

const PARTITION_TOLERANCE: f64 = 1e-9;

impl GradeLevelConfig {
    /// Build a configuration, rejecting anything that is not a contiguous
    /// non-overlapping cover of [0, 1]
    ///
    /// Levels are sorted by their lower bound before validation. Bounds within
    /// the partition tolerance are then snapped together, so every
    /// percentile in [0, 1] falls in exactly one level.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mut levels: Vec<GradeLevel>,
    ) -> Result<Self> {
        let id = id.into();
        if levels.is_empty() {
            return Err(Error::level_config(format!(
                "Level configuration '{}' has no levels",
                id
            )));
        }

        levels.sort_by(|a, b| a.min_percentile.total_cmp(&b.min_percentile));

        if levels[0].min_percentile.abs() > PARTITION_TOLERANCE {
            return Err(Error::level_config(format!(
                "Level configuration '{}' must start at 0, starts at {}",
                id, levels[0].min_percentile
            )));
        }

        for level in &levels {
            if level.max_percentile - level.min_percentile <= PARTITION_TOLERANCE {
                return Err(Error::level_config(format!(
                    "Level '{}' in '{}' has an empty range [{}, {})",
                    level.code, id, level.min_percentile, level.max_percentile
                )));
            }
        }

        for pair in levels.windows(2) {
            let gap = pair[1].min_percentile - pair[0].max_percentile;
            if gap.abs() > PARTITION_TOLERANCE {
                let kind = if gap > 0.0 { "gap" } else { "overlap" };
                return Err(Error::level_config(format!(
                    "Level configuration '{}' has a {} between '{}' and '{}'",
                    id, kind, pair[0].code, pair[1].code
                )));
            }
        }

        let last = &levels[levels.len() - 1];
        if (last.max_percentile - 1.0).abs() > PARTITION_TOLERANCE {
            return Err(Error::level_config(format!(
                "Level configuration '{}' must end at 1, ends at {}",
                id, last.max_percentile
            )));
        }

        levels[0].min_percentile = 0.0;
        for i in 1..levels.len() {
            levels[i].min_percentile = levels[i - 1].max_percentile;
        }
        let last = levels.len() - 1;
        levels[last].max_percentile = 1.0;

        Ok(Self {
            id,
            name: name.into(),
            levels,
            is_default: false,
        })
    }

    /// Level whose band contains the percentile; the last band is closed at 1
    pub fn level_for_percentile(&self, percentile: f64) -> &GradeLevel {
        let p = percentile.clamp(0.0, 1.0);
        self.levels
            .iter()
            .find(|level| p >= level.min_percentile && p < level.max_percentile)
            .unwrap_or(&self.levels[self.levels.len() - 1])
    }

    /// Level for a 1-based rank among `total` students, using p = rank / total
    pub fn level_for_rank(&self, rank: u32, total: usize) -> Option<&GradeLevel> {
        if rank == 0 || total == 0 {
            return None;
        }
        Some(self.level_for_percentile(f64::from(rank) / total as f64))
    }

    pub fn index_of(&self, code: &str) -> Option<usize> {
        self.levels.iter().position(|level| level.code == code)
    }

    /// Six-band scheme used when no configuration is stored
    pub fn default_six_level() -> Self {
        let levels = vec![
            GradeLevel::new("A+", "优秀+", 0.0, 0.05, "#10b981", "前5%"),
            GradeLevel::new("A", "优秀", 0.05, 0.25, "#3b82f6", "5%-25%"),
            GradeLevel::new("B+", "良好+", 0.25, 0.5, "#8b5cf6", "25%-50%"),
            GradeLevel::new("B", "良好", 0.5, 0.75, "#f59e0b", "50%-75%"),
            GradeLevel::new("C+", "合格+", 0.75, 0.95, "#ef4444", "75%-95%"),
            GradeLevel::new("C", "合格", 0.95, 1.0, "#6b7280", "后5%"),
        ];
        Self {
            id: constants::DEFAULT_LEVEL_CONFIG_ID.to_string(),
            name: "六级等级划分".to_string(),
            levels,
            is_default: true,
        }
    }

    /// Nine-band stanine-style scheme
    pub fn nine_tier() -> Self {
        let bounds = [0.0, 0.04, 0.11, 0.23, 0.40, 0.60, 0.77, 0.89, 0.96, 1.0];
        let labels = [
            "第一档", "第二档", "第三档", "第四档", "第五档", "第六档", "第七档", "第八档", "第九档",
        ];
        let colors = [
            "#047857", "#10b981", "#3b82f6", "#6366f1", "#8b5cf6", "#f59e0b", "#f97316", "#ef4444",
            "#6b7280",
        ];
        let levels = (0..9)
            .map(|i| {
                GradeLevel::new(
                    format!("T{}", i + 1),
                    labels[i],
                    bounds[i],
                    bounds[i + 1],
                    colors[i],
                    format!("{:.0}%-{:.0}%", bounds[i] * 100.0, bounds[i + 1] * 100.0),
                )
            })
            .collect();
        Self {
            id: constants::NINE_TIER_LEVEL_CONFIG_ID.to_string(),
            name: "九档等级划分".to_string(),
            levels,
            is_default: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_field_keys_round_trip_through_text() {
        let fields = [
            CanonicalField::StudentId,
            CanonicalField::Subject(SubjectKind::Math, AttributeKind::ClassRank),
            CanonicalField::Subject(SubjectKind::Total, AttributeKind::Grade),
            CanonicalField::Generic(AttributeKind::GradeRank),
            CanonicalField::ExamDate,
        ];
        for field in fields {
            let parsed: CanonicalField = field.key().parse().unwrap();
            assert_eq!(parsed, field);
        }
        assert_eq!(
            CanonicalField::Subject(SubjectKind::Chinese, AttributeKind::Score).key(),
            "chinese_score"
        );
        assert!("chinese_rank".parse::<CanonicalField>().is_err());
    }

    #[test]
    fn test_subject_from_normalized_name() {
        assert_eq!(
            SubjectKind::from_normalized_name("道法"),
            Some(SubjectKind::Politics)
        );
        assert_eq!(
            SubjectKind::from_normalized_name("数"),
            Some(SubjectKind::Math)
        );
        assert_eq!(SubjectKind::from_normalized_name("音乐"), None);
        assert_eq!(SubjectKind::Total.display_name(), "总分");
    }

    #[test]
    fn test_default_level_config_partition() {
        let config = GradeLevelConfig::default_six_level();
        assert_eq!(config.levels.len(), 6);
        assert!(GradeLevelConfig::new("copy", "copy", config.levels.clone()).is_ok());
        assert!(GradeLevelConfig::new("nine", "nine", GradeLevelConfig::nine_tier().levels).is_ok());
    }

    #[test]
    fn test_level_config_rejects_gap_and_overlap() {
        let gap = vec![
            GradeLevel::new("A", "A", 0.0, 0.4, "#000", ""),
            GradeLevel::new("B", "B", 0.5, 1.0, "#000", ""),
        ];
        assert!(GradeLevelConfig::new("gap", "gap", gap).is_err());

        let overlap = vec![
            GradeLevel::new("A", "A", 0.0, 0.6, "#000", ""),
            GradeLevel::new("B", "B", 0.5, 1.0, "#000", ""),
        ];
        assert!(GradeLevelConfig::new("overlap", "overlap", overlap).is_err());

        let short = vec![GradeLevel::new("A", "A", 0.0, 0.9, "#000", "")];
        assert!(GradeLevelConfig::new("short", "short", short).is_err());
    }

    #[test]
    fn test_near_miss_bounds_leave_no_unmatched_percentile() {
        let levels = vec![
            GradeLevel::new("A", "A", 0.0, 0.5, "#000", ""),
            GradeLevel::new("B", "B", 0.5000000005, 1.0 - 5e-10, "#000", ""),
        ];
        let config = GradeLevelConfig::new("near", "near", levels).unwrap();
        assert_eq!(config.levels[1].min_percentile, 0.5);
        assert_eq!(config.levels[1].max_percentile, 1.0);

        let matching = |p: f64| {
            config
                .levels
                .iter()
                .filter(|level| p >= level.min_percentile && p < level.max_percentile)
                .count()
        };
        assert_eq!(matching(0.50000000025), 1);
        for step in 0..10_000 {
            let p = f64::from(step) / 10_000.0;
            assert_eq!(matching(p), 1, "percentile {}", p);
        }
        assert_eq!(config.level_for_percentile(0.50000000025).code, "B");
    }

    #[test]
    fn test_level_for_rank() {
        let config = GradeLevelConfig::default_six_level();
        assert_eq!(config.level_for_rank(3, 100).unwrap().code, "A+");
        assert_eq!(config.level_for_rank(5, 100).unwrap().code, "A");
        assert_eq!(config.level_for_rank(100, 100).unwrap().code, "C");
        assert!(config.level_for_rank(0, 100).is_none());
    }

    #[test]
    fn test_level_config_deserialization_validates() {
        let json = r##"{"id":"bad","name":"bad","levels":[{"code":"A","label":"A","min_percentile":0.1,"max_percentile":1.0,"color":"#fff"}]}"##;
        assert!(serde_json::from_str::<GradeLevelConfig>(json).is_err());
    }
}
