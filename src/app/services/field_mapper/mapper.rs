//! Header mapping and whole-file header analysis

use super::normalize::{non_empty, normalize_header};
use super::rules::{MappingRule, default_rules, evaluate_rules};
use crate::app::models::{CanonicalField, FieldMapping, MappingSource, RawRecord, SubjectKind};
use crate::constants::{STRONG_LOCAL_CONFIDENCE, UNKNOWN_FIELD_PREVIEW_VALUES};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Maps raw headers onto canonical fields using an ordered rule table
#[derive(Debug, Clone)]
pub struct FieldMapper {
    rules: Vec<MappingRule>,
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldMapper {
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    /// Map one header
    ///
    /// # Arguments
    ///
    /// * `header` - Header text exactly as it appears in the source
    ///
    /// # Returns
    ///
    /// The mapping decision; headers no rule recognises come back as
    /// `HeaderTarget::Unmapped` with confidence 0.
    pub fn map_header(&self, header: &str) -> FieldMapping {
        let normalized = normalize_header(header);
        match evaluate_rules(&self.rules, &normalized) {
            Some(matched) => FieldMapping::mapped(
                header,
                normalized,
                matched.field,
                matched.confidence,
                matched.rule,
            ),
            None => FieldMapping::unmapped(header, normalized, "no_match"),
        }
    }

    /// Map every header of a file and score the result as a whole
    pub fn analyze_headers(&self, headers: &[String]) -> HeaderAnalysis {
        let mappings = headers
            .iter()
            .map(|header| self.map_header(header))
            .collect();
        let analysis = HeaderAnalysis::from_mappings(mappings);
        debug!(
            "Analyzed {} headers: {} mapped, {} unmapped, confidence {:.2}",
            headers.len(),
            analysis.mapped_count(),
            analysis.unmapped.len(),
            analysis.confidence
        );
        analysis
    }
}

/// Result of mapping all headers of one file
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderAnalysis {
    /// One mapping per header, in source column order
    pub mappings: Vec<FieldMapping>,

    /// Subjects with at least one mapped column, in canonical order
    pub subjects: Vec<SubjectKind>,

    /// Headers left unmapped
    pub unmapped: Vec<String>,

    /// Missing required fields
    pub issues: Vec<String>,

    /// Collision demotions and similar notes
    pub warnings: Vec<String>,

    /// Aggregate confidence in [0.1, 0.99]
    pub confidence: f64,
}

impl HeaderAnalysis {
    /// Resolve collisions and compute the summary fields
    ///
    /// When several headers map to the same field the one with the highest
    /// precedence keeps it: strong local mappings first, then assistant
    /// suggestions, then everything else, with confidence breaking ties
    /// inside a tier and source order breaking exact ties.
    pub fn from_mappings(mut mappings: Vec<FieldMapping>) -> Self {
        let mut warnings = Vec::new();
        let mut winners: HashMap<CanonicalField, usize> = HashMap::new();

        for index in 0..mappings.len() {
            let Some(field) = mappings[index].field() else {
                continue;
            };
            match winners.get(&field).copied() {
                None => {
                    winners.insert(field, index);
                }
                Some(current) => {
                    let (winner, loser) =
                        if precedence(&mappings[index]) > precedence(&mappings[current]) {
                            winners.insert(field, index);
                            (index, current)
                        } else {
                            (current, index)
                        };
                    warnings.push(format!(
                        "Header '{}' also maps to {}; keeping '{}'",
                        mappings[loser].header, field, mappings[winner].header
                    ));
                    let demoted = &mappings[loser];
                    mappings[loser] = FieldMapping::unmapped(
                        demoted.header.clone(),
                        demoted.normalized.clone(),
                        format!("collision:{}", field),
                    )
                    .with_source(demoted.source);
                }
            }
        }

        let mut subjects: Vec<SubjectKind> = mappings
            .iter()
            .filter_map(|mapping| mapping.field().and_then(|field| field.subject()))
            .collect();
        subjects.sort();
        subjects.dedup();

        let unmapped = mappings
            .iter()
            .filter(|mapping| !mapping.is_mapped())
            .map(|mapping| mapping.header.clone())
            .collect();

        let mut analysis = Self {
            mappings,
            subjects,
            unmapped,
            issues: Vec::new(),
            warnings,
            confidence: 0.0,
        };
        analysis.issues = analysis.collect_issues();
        analysis.confidence = analysis.overall_confidence();
        analysis
    }

    fn collect_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !self.has_field(CanonicalField::Name) && !self.has_field(CanonicalField::StudentId) {
            issues.push("No student name or student id column found".to_string());
        } else if !self.has_field(CanonicalField::Name) {
            issues.push("No student name column found".to_string());
        }
        if !self.has_field(CanonicalField::ClassName) {
            issues.push("No class column found".to_string());
        }
        if !self.has_subject_data() {
            issues.push("No subject score or subject column found".to_string());
        }
        issues
    }

    /// coverage × 0.4 + mean confidence × 0.5 + required-field bonus + 0.1
    fn overall_confidence(&self) -> f64 {
        if self.mappings.is_empty() {
            return 0.1;
        }
        let mapped: Vec<f64> = self
            .mappings
            .iter()
            .filter(|mapping| mapping.is_mapped())
            .map(|mapping| mapping.confidence)
            .collect();
        let coverage = mapped.len() as f64 / self.mappings.len() as f64;
        let mean = if mapped.is_empty() {
            0.0
        } else {
            mapped.iter().sum::<f64>() / mapped.len() as f64
        };
        let has_identity =
            self.has_field(CanonicalField::Name) || self.has_field(CanonicalField::StudentId);
        let bonus = if has_identity && self.has_subject_data() {
            0.1
        } else {
            -0.2
        };
        (coverage * 0.4 + mean * 0.5 + bonus + 0.1).clamp(0.1, 0.99)
    }

    pub fn mapped_count(&self) -> usize {
        self.mappings.iter().filter(|m| m.is_mapped()).count()
    }

    pub fn has_field(&self, field: CanonicalField) -> bool {
        self.header_for(field).is_some()
    }

    /// Header currently holding a field
    pub fn header_for(&self, field: CanonicalField) -> Option<&str> {
        self.mappings
            .iter()
            .find(|mapping| mapping.field() == Some(field))
            .map(|mapping| mapping.header.as_str())
    }

    pub fn target_of(&self, header: &str) -> Option<CanonicalField> {
        self.mappings
            .iter()
            .find(|mapping| mapping.header == header)
            .and_then(|mapping| mapping.field())
    }

    /// Score-class headers, optionally counting the total
    pub fn score_column_count(&self, include_total: bool) -> usize {
        self.mappings
            .iter()
            .filter_map(|mapping| mapping.field())
            .filter(|field| field.is_score_class())
            .filter(|field| {
                include_total || matches!(field.subject(), Some(subject) if !subject.is_total())
            })
            .count()
    }

    fn has_subject_data(&self) -> bool {
        self.has_field(CanonicalField::SubjectName)
            || self
                .mappings
                .iter()
                .filter_map(|mapping| mapping.field())
                .any(|field| field.subject().is_some())
    }

    /// Up to five distinct values per unmapped header from the sample rows
    pub fn unknown_field_samples(&self, rows: &[RawRecord]) -> BTreeMap<String, Vec<String>> {
        self.unmapped
            .iter()
            .map(|header| {
                let mut values: Vec<String> = Vec::new();
                for value in rows.iter().filter_map(|row| row.get(header)) {
                    if values.len() >= UNKNOWN_FIELD_PREVIEW_VALUES {
                        break;
                    }
                    if let Some(value) = non_empty(value) {
                        if !values.contains(&value) {
                            values.push(value);
                        }
                    }
                }
                (header.clone(), values)
            })
            .collect()
    }
}

/// Precedence tier and confidence used for collision resolution
fn precedence(mapping: &FieldMapping) -> (u8, f64) {
    let tier = if mapping.source == MappingSource::Assistant {
        1
    } else if mapping.confidence >= STRONG_LOCAL_CONFIDENCE {
        2
    } else {
        0
    };
    (tier, mapping.confidence)
}
