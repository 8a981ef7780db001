//! Merge strategies for colliding grade records

use crate::app::adapters::stores::PendingWrite;
use crate::app::models::{LongFormGradeRecord, MergeStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the merge engine did with one incoming record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// No stored record had the key
    Inserted,
    Replaced,
    Updated,
    /// Stored record kept; counts toward `skipped`
    Skipped,
    Appended,
}

impl MergeOutcome {
    pub fn is_skipped(self) -> bool {
        self == MergeOutcome::Skipped
    }
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MergeOutcome::Inserted => "inserted",
            MergeOutcome::Replaced => "replaced",
            MergeOutcome::Updated => "updated",
            MergeOutcome::Skipped => "skipped",
            MergeOutcome::Appended => "appended",
        };
        f.write_str(text)
    }
}

/// Merge result: the outcome plus the write to commit, if any
#[derive(Debug, Clone, PartialEq)]
pub struct MergeDecision {
    pub outcome: MergeOutcome,
    pub write: Option<PendingWrite>,
}

/// Decide how an incoming record meets the record already stored under its key
///
/// `update` overlays the incoming non-empty fields onto the stored record and
/// keeps stored values the incoming record lacks. Unmapped extras are merged
/// the same way.
pub fn merge_record(
    existing: Option<&LongFormGradeRecord>,
    incoming: LongFormGradeRecord,
    strategy: MergeStrategy,
) -> MergeDecision {
    let Some(existing) = existing else {
        return MergeDecision {
            outcome: MergeOutcome::Inserted,
            write: Some(PendingWrite::upsert(incoming)),
        };
    };

    match strategy {
        MergeStrategy::Replace => MergeDecision {
            outcome: MergeOutcome::Replaced,
            write: Some(PendingWrite::upsert(incoming)),
        },
        MergeStrategy::Update => MergeDecision {
            outcome: MergeOutcome::Updated,
            write: Some(PendingWrite::upsert(overlay(existing, incoming))),
        },
        MergeStrategy::Skip => MergeDecision {
            outcome: MergeOutcome::Skipped,
            write: None,
        },
        MergeStrategy::Append => MergeDecision {
            outcome: MergeOutcome::Appended,
            write: Some(PendingWrite::append(incoming)),
        },
    }
}

fn overlay(existing: &LongFormGradeRecord, incoming: LongFormGradeRecord) -> LongFormGradeRecord {
    let mut extra = existing.extra.clone();
    extra.extend(incoming.extra);

    LongFormGradeRecord {
        score: incoming.score.or(existing.score),
        grade: incoming.grade.or_else(|| existing.grade.clone()),
        class_rank: incoming.class_rank.or(existing.class_rank),
        grade_rank: incoming.grade_rank.or(existing.grade_rank),
        extra,
        identity: existing.identity.clone(),
        exam: incoming.exam,
        subject: incoming.subject,
        source_index: incoming.source_index,
        imported_at: incoming.imported_at,
    }
}
