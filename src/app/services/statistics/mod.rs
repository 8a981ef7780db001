//! Derived statistics over committed grade records
//!
//! Once an import commits, the records of an exam can be ranked, placed into
//! percentile grade levels, and compared against an earlier exam to see how
//! students moved between levels.
//!
//! ## Architecture
//!
//! - [`ranking`] - Competition ranks within class, grade, or school scope
//! - [`grade_levels`] - Level assignment and the TTL cache of level configurations
//! - [`transition`] - Consolidation and transformation rates between two exams
//! - [`calculator`] - Store-backed exam statistics and student standings

pub mod calculator;
pub mod grade_levels;
pub mod ranking;
pub mod transition;

#[cfg(test)]
pub mod tests;

// Re-export main types for easy access
pub use calculator::{ExamStatistics, StatisticsCalculator, StudentStanding, SubjectSummary};
pub use grade_levels::{LevelAssignment, LevelConfigCache, LevelSource, assign_level};
pub use ranking::{RankScope, Ranking, competition_rank, rank_records, scope_group};
pub use transition::{LevelTransition, transition_metrics};
