//! Header to canonical field mapping
//!
//! This module turns free-form spreadsheet headers ("语文", "总分班名",
//! "Math_Grade", "考生学号") into the closed [`CanonicalField`] vocabulary with
//! a confidence score and the id of the rule that decided it.
//!
//! ## Architecture
//!
//! - [`normalize`] - Header, name, and cell normalization
//! - [`rules`] - The ordered rule table, most specific shapes first
//! - [`mapper`] - Single-header mapping and whole-file [`HeaderAnalysis`]
//! - [`assistant`] - Optional external assistant and suggestion merging
//! - [`memory`] - Mappings remembered across imports
//!
//! ## Usage
//!
//! ```rust
//! use grade_importer::app::services::field_mapper::FieldMapper;
//!
//! let mapper = FieldMapper::new();
//! let headers: Vec<String> = ["学号", "姓名", "班级", "语文", "数学", "总分"]
//!     .iter()
//!     .map(|h| h.to_string())
//!     .collect();
//! let analysis = mapper.analyze_headers(&headers);
//! assert_eq!(analysis.subjects.len(), 3);
//! ```
//!
//! [`CanonicalField`]: crate::app::models::CanonicalField

pub mod assistant;
pub mod mapper;
pub mod memory;
pub mod normalize;
pub mod rules;

#[cfg(test)]
pub mod tests;

// Re-export main types for easy access
pub use assistant::{
    AssistantContext, AssistantRequest, AssistantResponse, AssistedAnalysis, MappingAssistant,
};
pub use mapper::{FieldMapper, HeaderAnalysis};
pub use memory::MappingMemory;
pub use normalize::{normalize_header, normalize_name};
