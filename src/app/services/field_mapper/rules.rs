//! Ordered header matching rules
//!
//! Rules are evaluated in table order against a normalized header and the
//! first rule that matches decides the target. The order runs from the most
//! specific shapes to the least specific ones:
//!
//! 1. exact identity, exam metadata, and subject column headers
//! 2. total-score rank and grade headers ("总分班名", "总等级")
//! 3. subject rank and grade headers ("语文级排", "physics_grade")
//! 4. bare rank and grade headers ("班级排名", "等级")
//! 5. identity headers with extra text ("考生学号")
//! 6. subject score headers ("语文", "英语成绩")
//! 7. the bare score header ("分数")
//! 8. total score headers last ("总分")

use crate::app::models::{AttributeKind, CanonicalField, SubjectKind};
use crate::constants::{
    ABBREVIATION_MATCH_CONFIDENCE, AFFIX_MATCH_CONFIDENCE, CLASS_AFFIX, CLASS_EXACT,
    CLASS_RANK_TOKENS, CONTAINS_MATCH_CONFIDENCE, EXACT_MATCH_CONFIDENCE, EXAM_DATE_EXACT,
    EXAM_TITLE_EXACT, EXAM_TYPE_EXACT, GENERIC_RANK_HEADERS, GRADE_LEVEL_TOKENS,
    GRADE_RANK_TOKENS, NAME_AFFIX, NAME_EXACT, SCORE_TOKENS, STUDENT_ID_AFFIX, STUDENT_ID_EXACT,
    SUBJECT_COLUMN_EXACT, TOTAL_GRADE_PATTERNS, TOTAL_SCORE_PENALTY_TOKENS,
};

/// Confidence given to a total-score header carrying rank or grade fragments
const PENALIZED_TOTAL_CONFIDENCE: f64 = 0.5;

/// Headers naming something ("学校名称") never carry a rank
const NAME_OF_FRAGMENT: &str = "名称";

/// Successful rule evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub field: CanonicalField,
    pub confidence: f64,

    /// Rule id plus match kind, e.g. `subject.attribute:exact`
    pub rule: String,
}

/// How a rule decides whether a header matches
#[derive(Debug, Clone, Copy)]
pub enum RuleKind {
    /// Whole-header match against a pattern list
    Exact {
        field: CanonicalField,
        patterns: &'static [&'static str],
    },
    /// Total alias combined with a rank or grade token
    TotalAttribute,
    /// Subject alias combined with a rank or grade token
    SubjectAttribute,
    /// Rank or grade token without any subject
    GenericAttribute,
    /// Pattern anchored at either end of the header, or contained in it
    Affix {
        field: CanonicalField,
        patterns: &'static [&'static str],
    },
    /// Subject alias alone or followed by a score token
    SubjectScore,
    /// Score token alone
    GenericScore,
    /// Total alias
    TotalScore,
}

/// One entry of the ordered rule table
#[derive(Debug, Clone, Copy)]
pub struct MappingRule {
    pub id: &'static str,
    pub kind: RuleKind,
}

impl MappingRule {
    const fn new(id: &'static str, kind: RuleKind) -> Self {
        Self { id, kind }
    }

    /// Test a normalized header against this rule
    pub fn evaluate(&self, normalized: &str) -> Option<RuleMatch> {
        if normalized.is_empty() {
            return None;
        }
        let (field, confidence, kind) = match self.kind {
            RuleKind::Exact { field, patterns } => patterns
                .contains(&normalized)
                .then_some((field, EXACT_MATCH_CONFIDENCE, "exact"))?,
            RuleKind::TotalAttribute => match_total_attribute(normalized)?,
            RuleKind::SubjectAttribute => match_subject_attribute(normalized)?,
            RuleKind::GenericAttribute => match_generic_attribute(normalized)?,
            RuleKind::Affix { field, patterns } => {
                let (confidence, kind) = match_affix(normalized, patterns)?;
                (field, confidence, kind)
            }
            RuleKind::SubjectScore => match_subject_score(normalized)?,
            RuleKind::GenericScore => SCORE_TOKENS
                .contains(&normalized)
                .then_some((
                    CanonicalField::Generic(AttributeKind::Score),
                    EXACT_MATCH_CONFIDENCE,
                    "exact",
                ))?,
            RuleKind::TotalScore => match_total_score(normalized)?,
        };
        Some(RuleMatch {
            field,
            confidence,
            rule: format!("{}:{}", self.id, kind),
        })
    }
}

/// The default rule table in evaluation order
pub fn default_rules() -> Vec<MappingRule> {
    vec![
        MappingRule::new(
            "identity.student_id",
            RuleKind::Exact {
                field: CanonicalField::StudentId,
                patterns: STUDENT_ID_EXACT,
            },
        ),
        MappingRule::new(
            "identity.name",
            RuleKind::Exact {
                field: CanonicalField::Name,
                patterns: NAME_EXACT,
            },
        ),
        MappingRule::new(
            "identity.class_name",
            RuleKind::Exact {
                field: CanonicalField::ClassName,
                patterns: CLASS_EXACT,
            },
        ),
        MappingRule::new(
            "exam.title",
            RuleKind::Exact {
                field: CanonicalField::ExamTitle,
                patterns: EXAM_TITLE_EXACT,
            },
        ),
        MappingRule::new(
            "exam.type",
            RuleKind::Exact {
                field: CanonicalField::ExamType,
                patterns: EXAM_TYPE_EXACT,
            },
        ),
        MappingRule::new(
            "exam.date",
            RuleKind::Exact {
                field: CanonicalField::ExamDate,
                patterns: EXAM_DATE_EXACT,
            },
        ),
        MappingRule::new(
            "subject.column",
            RuleKind::Exact {
                field: CanonicalField::SubjectName,
                patterns: SUBJECT_COLUMN_EXACT,
            },
        ),
        MappingRule::new("total.attribute", RuleKind::TotalAttribute),
        MappingRule::new("subject.attribute", RuleKind::SubjectAttribute),
        MappingRule::new("generic.attribute", RuleKind::GenericAttribute),
        MappingRule::new(
            "identity.student_id",
            RuleKind::Affix {
                field: CanonicalField::StudentId,
                patterns: STUDENT_ID_AFFIX,
            },
        ),
        MappingRule::new(
            "identity.name",
            RuleKind::Affix {
                field: CanonicalField::Name,
                patterns: NAME_AFFIX,
            },
        ),
        MappingRule::new(
            "identity.class_name",
            RuleKind::Affix {
                field: CanonicalField::ClassName,
                patterns: CLASS_AFFIX,
            },
        ),
        MappingRule::new("subject.score", RuleKind::SubjectScore),
        MappingRule::new("generic.score", RuleKind::GenericScore),
        MappingRule::new("total.score", RuleKind::TotalScore),
    ]
}

// =============================================================================
// Matchers
// =============================================================================

type Matched = (CanonicalField, f64, &'static str);

/// Rank or grade attribute named by a header fragment
///
/// Class rank tokens are checked before grade rank tokens, and both before
/// letter-grade tokens, so "年级排名" is a rank and not a grade.
fn attribute_token(fragment: &str) -> Option<(AttributeKind, &'static str)> {
    if fragment.contains(NAME_OF_FRAGMENT) {
        return None;
    }
    [
        (AttributeKind::ClassRank, CLASS_RANK_TOKENS),
        (AttributeKind::GradeRank, GRADE_RANK_TOKENS),
        (AttributeKind::Grade, GRADE_LEVEL_TOKENS),
    ]
    .into_iter()
    .find_map(|(attribute, tokens)| {
        tokens
            .iter()
            .find(|token| fragment.contains(*token))
            .map(|token| (attribute, *token))
    })
}

/// Bare rank header, alone or after a score token ("排名", "成绩排名")
fn is_rank_fragment(fragment: &str) -> bool {
    let bare = SCORE_TOKENS
        .iter()
        .find_map(|token| fragment.strip_prefix(token))
        .unwrap_or(fragment);
    GENERIC_RANK_HEADERS.contains(&bare)
}

/// Confidence for a remainder that should be exactly one token
fn composite_confidence(remainder: &str, token: &str) -> (f64, &'static str) {
    if remainder == token {
        (EXACT_MATCH_CONFIDENCE, "exact")
    } else if remainder.starts_with(token) || remainder.ends_with(token) {
        (AFFIX_MATCH_CONFIDENCE, "affix")
    } else {
        (CONTAINS_MATCH_CONFIDENCE, "contains")
    }
}

/// Longest subject alias contained in the header
fn find_alias(normalized: &str, total: bool) -> Option<(SubjectKind, &'static str)> {
    SubjectKind::ALL
        .into_iter()
        .filter(|subject| subject.is_total() == total)
        .flat_map(|subject| subject.aliases().iter().map(move |alias| (subject, *alias)))
        .filter(|(_, alias)| normalized.contains(alias))
        .max_by_key(|(_, alias)| alias.chars().count())
}

/// Subject abbreviation heading the header, and the rest of the header
fn split_abbreviation(normalized: &str, total: bool) -> Option<(SubjectKind, &str)> {
    let first = normalized.chars().next()?;
    let rest = &normalized[first.len_utf8()..];
    SubjectKind::ALL
        .into_iter()
        .filter(|subject| subject.is_total() == total)
        .find(|subject| subject.abbreviation().starts_with(first))
        .map(|subject| (subject, rest))
}

fn remove_once(normalized: &str, alias: &str) -> String {
    normalized.replacen(alias, "", 1)
}

fn match_attribute_for(normalized: &str, total: bool) -> Option<Matched> {
    if let Some((subject, alias)) = find_alias(normalized, total) {
        let remainder = remove_once(normalized, alias);
        if let Some((attribute, token)) = attribute_token(&remainder) {
            let (confidence, kind) = composite_confidence(&remainder, token);
            return Some((CanonicalField::Subject(subject, attribute), confidence, kind));
        }
        if is_rank_fragment(&remainder) {
            return Some((
                CanonicalField::Subject(subject, AttributeKind::ClassRank),
                CONTAINS_MATCH_CONFIDENCE,
                "contains",
            ));
        }
        return None;
    }

    let (subject, rest) = split_abbreviation(normalized, total)?;
    let (attribute, token) = attribute_token(rest)?;
    (rest == token).then_some((
        CanonicalField::Subject(subject, attribute),
        ABBREVIATION_MATCH_CONFIDENCE,
        "abbreviation",
    ))
}

fn match_total_attribute(normalized: &str) -> Option<Matched> {
    if let Some(pattern) = TOTAL_GRADE_PATTERNS
        .iter()
        .find(|pattern| normalized.contains(*pattern))
    {
        let (confidence, kind) = if normalized == *pattern {
            (EXACT_MATCH_CONFIDENCE, "exact")
        } else {
            (CONTAINS_MATCH_CONFIDENCE, "contains")
        };
        return Some((
            CanonicalField::Subject(SubjectKind::Total, AttributeKind::Grade),
            confidence,
            kind,
        ));
    }
    match_attribute_for(normalized, true)
}

fn match_subject_attribute(normalized: &str) -> Option<Matched> {
    match_attribute_for(normalized, false)
}

fn match_generic_attribute(normalized: &str) -> Option<Matched> {
    if GENERIC_RANK_HEADERS.contains(&normalized) {
        return Some((
            CanonicalField::Generic(AttributeKind::ClassRank),
            EXACT_MATCH_CONFIDENCE,
            "exact",
        ));
    }
    if is_rank_fragment(normalized) {
        return Some((
            CanonicalField::Generic(AttributeKind::ClassRank),
            CONTAINS_MATCH_CONFIDENCE,
            "contains",
        ));
    }
    let (attribute, token) = attribute_token(normalized)?;
    let (confidence, kind) = composite_confidence(normalized, token);
    Some((CanonicalField::Generic(attribute), confidence, kind))
}

fn match_affix(normalized: &str, patterns: &[&str]) -> Option<(f64, &'static str)> {
    let mut ordered: Vec<&&str> = patterns.iter().collect();
    ordered.sort_by_key(|pattern| std::cmp::Reverse(pattern.chars().count()));

    ordered.into_iter().find_map(|pattern| {
        if normalized.starts_with(*pattern) || normalized.ends_with(*pattern) {
            Some((AFFIX_MATCH_CONFIDENCE, "affix"))
        } else if normalized.contains(*pattern) {
            Some((CONTAINS_MATCH_CONFIDENCE, "contains"))
        } else {
            None
        }
    })
}

fn match_subject_score(normalized: &str) -> Option<Matched> {
    if let Some((subject, alias)) = find_alias(normalized, false) {
        let field = CanonicalField::Subject(subject, AttributeKind::Score);
        if normalized == alias {
            return Some((field, EXACT_MATCH_CONFIDENCE, "exact"));
        }
        let remainder = remove_once(normalized, alias);
        if SCORE_TOKENS.contains(&remainder.as_str()) {
            return Some((field, EXACT_MATCH_CONFIDENCE, "exact"));
        }
        if normalized.starts_with(alias) || normalized.ends_with(alias) {
            return Some((field, AFFIX_MATCH_CONFIDENCE, "affix"));
        }
        return Some((field, CONTAINS_MATCH_CONFIDENCE, "contains"));
    }

    let (subject, rest) = split_abbreviation(normalized, false)?;
    (rest.is_empty() || SCORE_TOKENS.contains(&rest)).then_some((
        CanonicalField::Subject(subject, AttributeKind::Score),
        ABBREVIATION_MATCH_CONFIDENCE,
        "abbreviation",
    ))
}

fn match_total_score(normalized: &str) -> Option<Matched> {
    let field = CanonicalField::Subject(SubjectKind::Total, AttributeKind::Score);
    if let Some((_, alias)) = find_alias(normalized, true) {
        let remainder = remove_once(normalized, alias);
        if remainder.is_empty() || SCORE_TOKENS.contains(&remainder.as_str()) {
            return Some((field, EXACT_MATCH_CONFIDENCE, "exact"));
        }
        if TOTAL_SCORE_PENALTY_TOKENS
            .iter()
            .any(|token| remainder.contains(token))
        {
            return Some((field, PENALIZED_TOTAL_CONFIDENCE, "penalized"));
        }
        return Some((field, CONTAINS_MATCH_CONFIDENCE, "contains"));
    }

    let (_, rest) = split_abbreviation(normalized, true)?;
    rest.is_empty()
        .then_some((field, ABBREVIATION_MATCH_CONFIDENCE, "abbreviation"))
}

/// First match in a rule table
pub fn evaluate_rules(rules: &[MappingRule], normalized: &str) -> Option<RuleMatch> {
    rules.iter().find_map(|rule| rule.evaluate(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(header: &str) -> Option<CanonicalField> {
        evaluate_rules(&default_rules(), header).map(|m| m.field)
    }

    #[test]
    fn test_abbreviation_requires_whole_header() {
        // "学生性别" contains 生 but is not biology
        assert_eq!(field_of("学生性别"), None);
        assert_eq!(
            field_of("语班名"),
            Some(CanonicalField::Subject(
                SubjectKind::Chinese,
                AttributeKind::ClassRank
            ))
        );
        assert_eq!(
            field_of("数"),
            Some(CanonicalField::Subject(SubjectKind::Math, AttributeKind::Score))
        );
    }

    #[test]
    fn test_name_of_headers_are_not_ranks() {
        assert_eq!(field_of("班级名称"), Some(CanonicalField::ClassName));
        assert_eq!(field_of("学校名称"), None);
    }

    #[test]
    fn test_rank_after_score_token_is_a_rank() {
        assert_eq!(
            field_of("化学成绩排名"),
            Some(CanonicalField::Subject(
                SubjectKind::Chemistry,
                AttributeKind::ClassRank
            ))
        );
        assert_eq!(
            field_of("分数名次"),
            Some(CanonicalField::Generic(AttributeKind::ClassRank))
        );
        assert_eq!(
            field_of("化学成绩"),
            Some(CanonicalField::Subject(
                SubjectKind::Chemistry,
                AttributeKind::Score
            ))
        );
    }

    #[test]
    fn test_rank_tokens_before_class_affix() {
        assert_eq!(
            field_of("班级排名"),
            Some(CanonicalField::Generic(AttributeKind::ClassRank))
        );
        assert_eq!(
            field_of("年级名次"),
            Some(CanonicalField::Generic(AttributeKind::GradeRank))
        );
        assert_eq!(field_of("行政班级"), Some(CanonicalField::ClassName));
    }
}
