//! Level transition metrics between an entry and an exit exam

use crate::app::models::GradeLevelConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Movement into and out of one level
///
/// Level indices count from the best level, so "at or above L" means an exit
/// index no greater than L's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelTransition {
    pub code: String,
    pub label: String,

    /// Students whose entry level was L
    pub entry_count: usize,

    /// Of those, students whose exit level is L or better
    pub consolidated: usize,

    /// Students whose entry level was below L
    pub below_count: usize,

    /// Of those, students whose exit level is L or better
    pub transformed: usize,

    pub consolidation_rate: f64,
    pub transformation_rate: f64,
}

/// Transition metrics per level for students present in both exams
///
/// Both maps go from student id to level index in `config`. Students missing
/// from either exam are left out. A zero denominator gives a 0.0 rate.
pub fn transition_metrics(
    config: &GradeLevelConfig,
    entry: &BTreeMap<String, usize>,
    exit: &BTreeMap<String, usize>,
) -> Vec<LevelTransition> {
    let pairs: Vec<(usize, usize)> = entry
        .iter()
        .filter_map(|(student, entry_index)| {
            exit.get(student)
                .map(|exit_index| (*entry_index, *exit_index))
        })
        .collect();

    config
        .levels
        .iter()
        .enumerate()
        .map(|(index, level)| {
            let entry_count = pairs.iter().filter(|(e, _)| *e == index).count();
            let consolidated = pairs
                .iter()
                .filter(|(e, x)| *e == index && *x <= index)
                .count();
            let below_count = pairs.iter().filter(|(e, _)| *e > index).count();
            let transformed = pairs
                .iter()
                .filter(|(e, x)| *e > index && *x <= index)
                .count();

            LevelTransition {
                code: level.code.clone(),
                label: level.label.clone(),
                entry_count,
                consolidated,
                below_count,
                transformed,
                consolidation_rate: rate(consolidated, entry_count),
                transformation_rate: rate(transformed, below_count),
            }
        })
        .collect()
}

fn rate(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
