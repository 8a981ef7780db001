//! Remembered header mappings
//!
//! Mappings confirmed by a completed import are kept for a while and offered
//! to later imports whose heuristics could not place the same header.

use super::mapper::HeaderAnalysis;
use crate::app::cache::{Clock, TtlCache};
use crate::app::models::{FieldMapping, MappingSource};
use crate::constants::STRONG_LOCAL_CONFIDENCE;
use chrono::Duration;
use std::sync::Arc;
use tracing::debug;

/// Mapping cache keyed by normalized header
pub struct MappingMemory {
    cache: TtlCache<String, FieldMapping>,
}

impl MappingMemory {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: TtlCache::new(ttl, clock),
        }
    }

    pub fn with_ttl_secs(ttl_secs: u64) -> Self {
        Self {
            cache: TtlCache::with_ttl_secs(ttl_secs),
        }
    }

    /// Remember every mapped header of a confirmed analysis
    pub fn remember(&self, analysis: &HeaderAnalysis) -> usize {
        let mut stored = 0;
        for mapping in analysis.mappings.iter().filter(|m| m.is_mapped()) {
            self.cache.set(mapping.normalized.clone(), mapping.clone());
            stored += 1;
        }
        debug!("Remembered {} header mappings", stored);
        stored
    }

    pub fn recall(&self, normalized: &str) -> Option<Arc<FieldMapping>> {
        self.cache.get(&normalized.to_string())
    }

    /// Fill unmapped or weak headers from memory
    ///
    /// A remembered mapping replaces a local one only when the local mapping
    /// is not strong and the remembered confidence is higher.
    pub fn apply(&self, analysis: &HeaderAnalysis) -> HeaderAnalysis {
        let mut reused = 0;
        let mappings = analysis
            .mappings
            .iter()
            .map(|mapping| {
                if mapping.is_mapped() && mapping.confidence >= STRONG_LOCAL_CONFIDENCE {
                    return mapping.clone();
                }
                match self.recall(&mapping.normalized) {
                    Some(remembered) if remembered.confidence > mapping.confidence => {
                        reused += 1;
                        FieldMapping {
                            header: mapping.header.clone(),
                            source: MappingSource::Cache,
                            ..(*remembered).clone()
                        }
                    }
                    _ => mapping.clone(),
                }
            })
            .collect();

        if reused > 0 {
            debug!("Reused {} remembered header mappings", reused);
        }
        let mut merged = HeaderAnalysis::from_mappings(mappings);
        merged.warnings.splice(0..0, analysis.warnings.iter().cloned());
        merged
    }

    pub fn invalidate(&self, normalized: &str) -> bool {
        self.cache.invalidate(&normalized.to_string())
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
