//! Student identity resolution and record merging
//!
//! Rows carry loosely typed identity fields (an optional id, a name that may
//! be spelled with stray spaces or full-width characters, a class written a
//! dozen ways). This module finds the stored student each row belongs to, or
//! mints a new one, and decides what happens when the incoming grade record
//! collides with one already in the store.
//!
//! ## Architecture
//!
//! - [`resolver`] - Exact, fuzzy, and minted identity matching with a task-local memo
//! - [`merge`] - Merge strategies for records whose key already exists
//!
//! Matching order is exact student id, then exact normalized name and class,
//! then fuzzy name similarity inside the same class. Only when all three miss
//! is a new identity minted, and minting goes through
//! [`IdentityStore::insert_if_absent`] so concurrent imports agree on one id.
//!
//! [`IdentityStore::insert_if_absent`]: crate::app::adapters::stores::IdentityStore::insert_if_absent

pub mod merge;
pub mod resolver;

#[cfg(test)]
pub mod tests;

// Re-export main types for easy access
pub use merge::{MergeDecision, MergeOutcome, merge_record};
pub use resolver::{IdentityResolver, Resolution, mint_student_id, similarity};
