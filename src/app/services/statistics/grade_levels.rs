//! Percentile grade levels and the level configuration cache

use super::ranking::Ranking;
use crate::app::adapters::stores::LevelConfigSource;
use crate::app::cache::{Clock, TtlCache};
use crate::app::models::GradeLevelConfig;
use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Where a student's level came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
    /// The source file carried a grade label
    Imported,
    /// Derived from the rank percentile
    Computed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelAssignment {
    pub code: String,
    pub label: String,

    /// Position in the configuration, 0 for the best level; None for an
    /// imported label the configuration does not define
    pub index: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,

    pub source: LevelSource,
}

/// Level for one record
///
/// An imported grade label is authoritative and is kept even when the
/// configuration has no level with that code. Otherwise the level comes from
/// p = rank / peers; unranked records get no level.
pub fn assign_level(
    config: &GradeLevelConfig,
    imported_grade: Option<&str>,
    ranking: Option<Ranking>,
) -> Option<LevelAssignment> {
    if let Some(grade) = imported_grade.map(str::trim).filter(|g| !g.is_empty()) {
        let index = config.index_of(grade);
        let label = index
            .map(|i| config.levels[i].label.clone())
            .unwrap_or_else(|| grade.to_string());
        return Some(LevelAssignment {
            code: grade.to_string(),
            label,
            index,
            percentile: ranking.map(|r| r.percentile()),
            source: LevelSource::Imported,
        });
    }

    let ranking = ranking?;
    let percentile = ranking.percentile();
    let level = config.level_for_percentile(percentile);
    Some(LevelAssignment {
        code: level.code.clone(),
        label: level.label.clone(),
        index: config.index_of(&level.code),
        percentile: Some(percentile),
        source: LevelSource::Computed,
    })
}

/// Level configurations by id, read through a TTL cache
///
/// Entries are replaced whole on reload or save; a caller holding an
/// `Arc<GradeLevelConfig>` keeps a consistent snapshot.
pub struct LevelConfigCache {
    cache: TtlCache<String, GradeLevelConfig>,
    source: Arc<dyn LevelConfigSource>,
}

impl LevelConfigCache {
    pub fn new(source: Arc<dyn LevelConfigSource>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: TtlCache::new(ttl, clock),
            source,
        }
    }

    pub fn with_ttl_secs(source: Arc<dyn LevelConfigSource>, ttl_secs: u64) -> Self {
        Self {
            cache: TtlCache::with_ttl_secs(ttl_secs),
            source,
        }
    }

    /// Cached configuration, loading it from the source on a miss
    pub async fn get(&self, id: &str) -> Result<Arc<GradeLevelConfig>> {
        if let Some(config) = self.cache.get(&id.to_string()) {
            return Ok(config);
        }

        let config = self.source.load_level_config(id).await?.ok_or_else(|| {
            Error::level_config(format!("Unknown grade level configuration '{}'", id))
        })?;
        debug!("Loaded grade level configuration '{}'", id);
        Ok(self.cache.set(id.to_string(), config))
    }

    /// Persist a configuration and replace its cache entry
    pub async fn save(&self, config: GradeLevelConfig) -> Result<Arc<GradeLevelConfig>> {
        self.source.save_level_config(&config).await?;
        Ok(self.cache.set(config.id.clone(), config))
    }

    pub fn invalidate(&self, id: &str) -> bool {
        self.cache.invalidate(&id.to_string())
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}
