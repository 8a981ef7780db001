//! Exam statistics computed from the grade store

use super::grade_levels::{LevelAssignment, LevelConfigCache, assign_level};
use super::ranking::{RankScope, Ranking, rank_records};
use super::transition::{LevelTransition, transition_metrics};
use crate::app::adapters::stores::GradeStore;
use crate::app::models::{ExamInfo, LongFormGradeRecord, StudentIdentity};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// One student's result in one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentStanding {
    pub identity: StudentIdentity,
    pub subject: String,
    pub score: Option<f64>,
    pub class_rank: Option<Ranking>,
    pub grade_rank: Option<Ranking>,
    pub school_rank: Option<Ranking>,
    pub level: Option<LevelAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSummary {
    pub subject: String,
    pub records: usize,
    pub scored: usize,
    pub mean: Option<f64>,
    pub max: Option<f64>,
    pub min: Option<f64>,

    /// Students per level code
    pub level_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamStatistics {
    pub exam: ExamInfo,
    pub level_config_id: String,

    /// Scope whose percentile drives grade levels
    pub level_scope: RankScope,
    pub standings: Vec<StudentStanding>,

    /// Subjects in order of first appearance
    pub subjects: Vec<SubjectSummary>,
}

impl ExamStatistics {
    pub fn standings_for<'a>(
        &'a self,
        subject: &'a str,
    ) -> impl Iterator<Item = &'a StudentStanding> + 'a {
        self.standings.iter().filter(move |s| s.subject == subject)
    }
}

/// Computes ranks, levels, and transitions for stored exams
pub struct StatisticsCalculator {
    grades: Arc<dyn GradeStore>,
    levels: Arc<LevelConfigCache>,
    level_scope: RankScope,
}

impl StatisticsCalculator {
    pub fn new(
        grades: Arc<dyn GradeStore>,
        levels: Arc<LevelConfigCache>,
        level_scope: RankScope,
    ) -> Self {
        Self {
            grades,
            levels,
            level_scope,
        }
    }

    /// Stored exam with this title; the most recent one when several share it
    pub async fn find_exam(&self, title: &str) -> Result<ExamInfo> {
        self.grades
            .exams()
            .await?
            .into_iter()
            .filter(|exam| exam.title == title)
            .max_by_key(|exam| exam.date)
            .ok_or_else(|| Error::data_validation(format!("No stored exam titled '{}'", title)))
    }

    pub async fn exam_statistics(
        &self,
        exam: &ExamInfo,
        level_config_id: &str,
    ) -> Result<ExamStatistics> {
        let config = self.levels.get(level_config_id).await?;
        let records = self.grades.records_for_exam(&exam.key()).await?;
        debug!("Computing statistics over {} records", records.len());

        let class_ranks = rank_records(&records, RankScope::Class);
        let grade_ranks = rank_records(&records, RankScope::Grade);
        let school_ranks = rank_records(&records, RankScope::School);

        let standings: Vec<StudentStanding> = records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let driving = match self.level_scope {
                    RankScope::Class => class_ranks[i],
                    RankScope::Grade => grade_ranks[i],
                    RankScope::School => school_ranks[i],
                };
                StudentStanding {
                    identity: record.identity.clone(),
                    subject: record.subject.clone(),
                    score: record.score,
                    class_rank: class_ranks[i],
                    grade_rank: grade_ranks[i],
                    school_rank: school_ranks[i],
                    level: assign_level(&config, record.grade.as_deref(), driving),
                }
            })
            .collect();

        let subjects = summarize(&records, &standings);
        info!(
            "Exam '{}': {} standings across {} subjects",
            exam.title,
            standings.len(),
            subjects.len()
        );

        Ok(ExamStatistics {
            exam: exam.clone(),
            level_config_id: config.id.clone(),
            level_scope: self.level_scope,
            standings,
            subjects,
        })
    }

    /// Level transitions in one subject from `entry` to `exit`
    pub async fn transitions(
        &self,
        entry: &ExamInfo,
        exit: &ExamInfo,
        subject: &str,
        level_config_id: &str,
    ) -> Result<Vec<LevelTransition>> {
        let config = self.levels.get(level_config_id).await?;
        let entry_statistics = self.exam_statistics(entry, level_config_id).await?;
        let exit_statistics = self.exam_statistics(exit, level_config_id).await?;
        Ok(transition_metrics(
            &config,
            &level_indices(&entry_statistics, subject),
            &level_indices(&exit_statistics, subject),
        ))
    }
}

fn level_indices(statistics: &ExamStatistics, subject: &str) -> BTreeMap<String, usize> {
    statistics
        .standings_for(subject)
        .filter_map(|standing| {
            let index = standing.level.as_ref()?.index?;
            Some((standing.identity.student_id.clone(), index))
        })
        .collect()
}

fn summarize(
    records: &[LongFormGradeRecord],
    standings: &[StudentStanding],
) -> Vec<SubjectSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut by_subject: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        if !by_subject.contains_key(record.subject.as_str()) {
            order.push(record.subject.clone());
        }
        by_subject.entry(record.subject.as_str()).or_default().push(i);
    }

    order
        .into_iter()
        .map(|subject| {
            let indices = by_subject.get(subject.as_str()).cloned().unwrap_or_default();
            let scores: Vec<f64> = indices.iter().filter_map(|i| records[*i].score).collect();
            let mut level_counts = BTreeMap::new();
            for i in &indices {
                if let Some(level) = &standings[*i].level {
                    *level_counts.entry(level.code.clone()).or_insert(0) += 1;
                }
            }

            SubjectSummary {
                records: indices.len(),
                scored: scores.len(),
                mean: (!scores.is_empty())
                    .then(|| scores.iter().sum::<f64>() / scores.len() as f64),
                max: scores.iter().copied().reduce(f64::max),
                min: scores.iter().copied().reduce(f64::min),
                level_counts,
                subject,
            }
        })
        .collect()
}
