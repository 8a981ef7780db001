//! Tests for the field mapper module
//!
//! This module provides unit tests for header mapping, analysis, assistant
//! merging, and remembered mappings.

pub mod memory_tests;

// Test helper functions and fixtures
use crate::app::models::RawRecord;

/// Build an owned header list
pub fn create_test_headers(headers: &[&str]) -> Vec<String> {
    headers.iter().map(|h| h.to_string()).collect()
}

/// Build sample rows for a header list
pub fn create_test_rows(headers: &[&str], rows: &[&[&str]]) -> Vec<RawRecord> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            RawRecord::new(
                index,
                headers
                    .iter()
                    .zip(row.iter())
                    .map(|(h, v)| (h.to_string(), v.to_string()))
                    .collect(),
            )
        })
        .collect()
}
