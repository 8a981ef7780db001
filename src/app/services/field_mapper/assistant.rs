//! Fallback mapping assistant contract and suggestion merging
//!
//! The assistant is an optional external collaborator consulted when local
//! heuristics are not confident enough. It is never required: a timeout or an
//! error leaves the heuristic result in place and adds a warning.
//!
//! Precedence when merging: strong local mappings (confidence ≥ 0.95) win,
//! then assistant suggestions, then weak local mappings, then unmapped.

use super::mapper::HeaderAnalysis;
use crate::app::models::{CanonicalField, FieldMapping, MappingSource, RawRecord, TableLayout};
use crate::constants::STRONG_LOCAL_CONFIDENCE;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Context sent alongside headers and samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Aggregate confidence of the local heuristics
    pub local_confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_layout: Option<TableLayout>,

    /// Sample values for headers the heuristics left unmapped
    #[serde(default)]
    pub unknown_fields: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantRequest {
    pub headers: Vec<String>,
    pub sample_rows: Vec<BTreeMap<String, String>>,
    pub context: AssistantContext,
}

impl AssistantRequest {
    pub fn new(headers: &[String], samples: &[RawRecord], context: AssistantContext) -> Self {
        Self {
            headers: headers.to_vec(),
            sample_rows: samples
                .iter()
                .map(|row| row.cells.iter().cloned().collect())
                .collect(),
            context,
        }
    }
}

/// Assistant suggestions; mappings are header → canonical field key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantResponse {
    #[serde(default)]
    pub field_mappings: BTreeMap<String, String>,

    #[serde(default)]
    pub detected_subjects: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_guess: Option<TableLayout>,

    pub confidence: f64,

    #[serde(default)]
    pub issues: Vec<String>,

    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// External collaborator that proposes header mappings
#[async_trait]
pub trait MappingAssistant: Send + Sync {
    async fn suggest(&self, request: &AssistantRequest) -> anyhow::Result<AssistantResponse>;

    fn name(&self) -> &str {
        "assistant"
    }
}

/// Outcome of consulting the assistant
#[derive(Debug, Clone)]
pub struct AssistedAnalysis {
    pub analysis: HeaderAnalysis,
    pub structure_guess: Option<TableLayout>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,

    /// False when the assistant timed out or failed
    pub consulted: bool,
}

impl AssistedAnalysis {
    fn unchanged(local: &HeaderAnalysis, warning: String) -> Self {
        Self {
            analysis: local.clone(),
            structure_guess: None,
            warnings: vec![warning],
            suggestions: Vec::new(),
            consulted: false,
        }
    }
}

/// Ask the assistant for suggestions, bounded by a timeout
pub async fn consult(
    assistant: &dyn MappingAssistant,
    local: &HeaderAnalysis,
    request: &AssistantRequest,
    timeout: Duration,
) -> AssistedAnalysis {
    debug!(
        "Consulting {} for {} headers (local confidence {:.2})",
        assistant.name(),
        request.headers.len(),
        local.confidence
    );

    match tokio::time::timeout(timeout, assistant.suggest(request)).await {
        Err(_) => {
            let message = format!(
                "Mapping assistant {} timed out after {}s; using heuristic mappings",
                assistant.name(),
                timeout.as_secs()
            );
            warn!("{}", message);
            AssistedAnalysis::unchanged(local, message)
        }
        Ok(Err(error)) => {
            let message = format!(
                "Mapping assistant {} failed: {:#}; using heuristic mappings",
                assistant.name(),
                error
            );
            warn!("{}", message);
            AssistedAnalysis::unchanged(local, message)
        }
        Ok(Ok(response)) => {
            let (analysis, mut warnings) = merge_suggestions(local, &response);
            warnings.extend(response.issues.iter().cloned());
            AssistedAnalysis {
                analysis,
                structure_guess: response.structure_guess,
                warnings,
                suggestions: response.suggestions.clone(),
                consulted: true,
            }
        }
    }
}

/// Merge assistant suggestions into a local analysis
///
/// # Returns
///
/// The merged analysis with collisions re-resolved, and warnings for
/// suggestions that named no known field.
pub fn merge_suggestions(
    local: &HeaderAnalysis,
    response: &AssistantResponse,
) -> (HeaderAnalysis, Vec<String>) {
    let mut warnings = Vec::new();
    let confidence = response.confidence.clamp(0.0, 1.0);

    let merged = local
        .mappings
        .iter()
        .map(|mapping| {
            if mapping.is_mapped() && mapping.confidence >= STRONG_LOCAL_CONFIDENCE {
                return mapping.clone();
            }
            let Some(suggested) = response.field_mappings.get(&mapping.header) else {
                return mapping.clone();
            };
            if suggested.trim().eq_ignore_ascii_case("unmapped") || suggested.trim().is_empty() {
                return mapping.clone();
            }
            match suggested.parse::<CanonicalField>() {
                Ok(field) => FieldMapping::mapped(
                    mapping.header.clone(),
                    mapping.normalized.clone(),
                    field,
                    confidence,
                    "assistant",
                )
                .with_source(MappingSource::Assistant),
                Err(_) => {
                    warnings.push(format!(
                        "Assistant suggested unknown field '{}' for header '{}'",
                        suggested, mapping.header
                    ));
                    mapping.clone()
                }
            }
        })
        .collect();

    let mut analysis = HeaderAnalysis::from_mappings(merged);
    analysis.warnings.splice(0..0, local.warnings.iter().cloned());
    (analysis, warnings)
}
