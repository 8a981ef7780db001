//! Header mapping and layout decisions made before any row is processed

use crate::app::models::task::ImportOptions;
use crate::app::models::{CanonicalField, ExamInfo, TableLayout};
use crate::app::services::exam_inference::infer_from_path;
use crate::app::services::field_mapper::assistant::consult;
use crate::app::services::field_mapper::{
    AssistantContext, AssistantRequest, FieldMapper, HeaderAnalysis, MappingAssistant,
    MappingMemory,
};
use crate::app::services::source_reader::SourceTable;
use crate::app::services::structure_detector::{StructureDetector, StructureReport};
use crate::config::MappingConfig;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Everything decided about a file before its rows are transformed
#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub headers: Vec<String>,
    pub analysis: HeaderAnalysis,
    pub structure: StructureReport,

    /// Exam for rows without exam columns
    pub exam: ExamInfo,

    /// Sample values of unmapped headers
    pub unknown_fields: BTreeMap<String, Vec<String>>,

    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub assistant_consulted: bool,
}

impl ImportPlan {
    /// Layout the rows will be read with
    pub fn layout(&self) -> TableLayout {
        self.structure.layout
    }

    /// Whether rows can be tied to a student at all
    pub fn has_identity_columns(&self) -> bool {
        self.analysis.has_field(CanonicalField::Name)
            || self.analysis.has_field(CanonicalField::StudentId)
    }
}

/// Builds [`ImportPlan`]s from the mapper, remembered mappings, the structure
/// detector, and the optional mapping assistant
pub struct ImportPlanner {
    mapper: FieldMapper,
    detector: StructureDetector,
    memory: Option<Arc<MappingMemory>>,
    assistant: Option<Arc<dyn MappingAssistant>>,
    assistant_threshold: f64,
    assistant_timeout: Duration,
    sample_size: usize,
}

impl ImportPlanner {
    pub fn new(config: &MappingConfig) -> Self {
        Self {
            mapper: FieldMapper::new(),
            detector: StructureDetector::new(config.wide_subject_threshold, config.sample_size),
            memory: None,
            assistant: None,
            assistant_threshold: config.assistant_threshold,
            assistant_timeout: Duration::from_secs(config.assistant_timeout_secs),
            sample_size: config.sample_size,
        }
    }

    pub fn with_memory(mut self, memory: Arc<MappingMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_assistant(mut self, assistant: Arc<dyn MappingAssistant>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    /// Map headers, decide the layout, and settle the default exam
    ///
    /// The assistant is consulted only when the local confidence is below the
    /// configured threshold. An operator layout in `options` skips detection.
    pub async fn plan(
        &self,
        source: &Path,
        table: &SourceTable,
        options: &ImportOptions,
    ) -> ImportPlan {
        let samples = table.sample(self.sample_size);
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        let mut analysis = self.mapper.analyze_headers(&table.headers);
        if let Some(memory) = &self.memory {
            analysis = memory.apply(&analysis);
        }

        let detect = |analysis: &HeaderAnalysis| match options.layout_override {
            Some(layout) => StructureReport::overridden(layout),
            None => self.detector.detect(analysis, samples),
        };
        let mut structure = detect(&analysis);

        let mut assistant_consulted = false;
        if let Some(assistant) = &self.assistant {
            if analysis.confidence < self.assistant_threshold {
                let context = AssistantContext {
                    file_name: source
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned()),
                    local_confidence: analysis.confidence,
                    detected_layout: Some(structure.layout),
                    unknown_fields: analysis.unknown_field_samples(samples),
                };
                let request = AssistantRequest::new(&table.headers, samples, context);
                let assisted =
                    consult(assistant.as_ref(), &analysis, &request, self.assistant_timeout).await;

                warnings.extend(assisted.warnings);
                suggestions.extend(assisted.suggestions);
                if let Some(guess) = assisted.structure_guess {
                    suggestions.push(format!("Mapping assistant suggests the {} layout", guess));
                }
                if assisted.consulted {
                    analysis = assisted.analysis;
                    structure = detect(&analysis);
                    assistant_consulted = true;
                }
            }
        }

        let unknown_fields = analysis.unknown_field_samples(samples);
        warnings.extend(analysis.warnings.iter().cloned());
        warnings.extend(analysis.issues.iter().cloned());
        for header in &analysis.unmapped {
            warnings.push(format!("Unmapped header '{}' kept as extra data", header));
        }

        let exam = match &options.exam {
            Some(exam) => exam.clone(),
            None => {
                let exam = infer_from_path(source).unwrap_or_default();
                if !analysis.has_field(CanonicalField::ExamTitle) {
                    warnings.push(format!(
                        "Exam '{}' inferred from the file name",
                        exam.title
                    ));
                }
                exam
            }
        };

        info!(
            "Planned {}: {} mapped headers, {}",
            source.display(),
            analysis.mapped_count(),
            structure.summary()
        );
        debug!("Plan warnings: {:?}", warnings);

        ImportPlan {
            headers: table.headers.clone(),
            analysis,
            structure,
            exam,
            unknown_fields,
            warnings,
            suggestions,
            assistant_consulted,
        }
    }

    /// Remember the mappings of a plan whose import completed
    pub fn confirm(&self, plan: &ImportPlan) -> usize {
        self.memory
            .as_ref()
            .map(|memory| memory.remember(&plan.analysis))
            .unwrap_or(0)
    }
}
