//! Wide-to-long record transformation
//!
//! This module turns mapped source rows into per-subject entries and, once
//! the student identity is resolved, into [`LongFormGradeRecord`]s.
//!
//! ## Architecture
//!
//! - [`numeric`] - Score, rank, and grade cell coercion with absent-value markers
//! - [`transformer`] - Column planning per file and row explosion
//!
//! A wide row yields one record per subject with at least one populated
//! attribute, the total included as its own `总分` record. A long row yields
//! exactly one record. A row with an identity and no usable values yields
//! none and carries a `NoUsableScores` warning.
//!
//! [`LongFormGradeRecord`]: crate::app::models::LongFormGradeRecord

pub mod numeric;
pub mod transformer;

#[cfg(test)]
pub mod tests;

// Re-export main types for easy access
pub use numeric::{CellError, parse_grade, parse_rank, parse_score};
pub use transformer::{RecordTransformer, RowWarning, SubjectEntry, TransformedRow};
