//! Competition ranking within a scope

use crate::app::adapters::stores::class_key;
use crate::app::models::LongFormGradeRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Grade prefix of a class name: "高一", "初三", "七年级", "2023级"
static GRADE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:高|初)[一二三]|[一二三四五六七八九]年级|\d{2,4}级)")
        .expect("valid grade prefix pattern")
});

/// Peer group a rank is computed within
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankScope {
    Class,
    #[default]
    Grade,
    School,
}

impl fmt::Display for RankScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankScope::Class => f.write_str("class"),
            RankScope::Grade => f.write_str("grade"),
            RankScope::School => f.write_str("school"),
        }
    }
}

impl FromStr for RankScope {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "class" => Ok(RankScope::Class),
            "grade" => Ok(RankScope::Grade),
            "school" => Ok(RankScope::School),
            other => Err(crate::Error::configuration(format!(
                "Unknown rank scope '{}'. Expected class, grade, or school",
                other
            ))),
        }
    }
}

/// 1-based rank and the number of scored peers it was computed among
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    pub rank: u32,
    pub peers: usize,
}

impl Ranking {
    /// rank / peers
    pub fn percentile(&self) -> f64 {
        if self.peers == 0 {
            return 0.0;
        }
        f64::from(self.rank) / self.peers as f64
    }
}

/// 1 + number of peer scores strictly greater than `score`
///
/// Ties share a rank and the next distinct score skips ahead.
pub fn competition_rank(score: f64, peers: &[f64]) -> u32 {
    let above = peers.iter().filter(|peer| **peer > score).count();
    u32::try_from(above).unwrap_or(u32::MAX - 1) + 1
}

/// Group key of a record within a scope
///
/// Grade scope reads the grade prefix off the class name; classes without a
/// recognizable prefix rank together as one grade.
pub fn scope_group(record: &LongFormGradeRecord, scope: RankScope) -> String {
    match scope {
        RankScope::Class => class_key(&record.identity.class_name),
        RankScope::Grade => GRADE_PREFIX
            .find(record.identity.class_name.trim())
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        RankScope::School => String::new(),
    }
}

/// Rank every record among peers with the same exam, subject, and scope group
///
/// The result is aligned with `records`; records without a score are unranked.
pub fn rank_records(records: &[LongFormGradeRecord], scope: RankScope) -> Vec<Option<Ranking>> {
    let mut groups: HashMap<(String, String, String), Vec<f64>> = HashMap::new();
    for record in records {
        if let Some(score) = record.score {
            groups
                .entry(group_key(record, scope))
                .or_default()
                .push(score);
        }
    }

    records
        .iter()
        .map(|record| {
            let score = record.score?;
            let peers = groups.get(&group_key(record, scope))?;
            Some(Ranking {
                rank: competition_rank(score, peers),
                peers: peers.len(),
            })
        })
        .collect()
}

fn group_key(record: &LongFormGradeRecord, scope: RankScope) -> (String, String, String) {
    (
        record.exam.key(),
        record.subject.clone(),
        scope_group(record, scope),
    )
}
