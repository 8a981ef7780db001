//! Tests for level assignment and the level configuration cache

use super::*;
use crate::app::adapters::stores::LevelConfigSource;
use crate::app::cache::ManualClock;
use crate::app::models::{GradeLevel, GradeLevelConfig};
use crate::app::services::statistics::{
    LevelConfigCache, LevelSource, Ranking, assign_level,
};
use chrono::Duration;
use std::sync::Arc;

fn ranking(rank: u32, peers: usize) -> Option<Ranking> {
    Some(Ranking { rank, peers })
}

#[test]
fn test_percentile_levels_for_a_hundred_students() {
    let config = GradeLevelConfig::default_six_level();

    let third = assign_level(&config, None, ranking(3, 100)).unwrap();
    assert_eq!(third.code, "A+");
    assert_eq!(third.label, "优秀+");
    assert_eq!(third.source, LevelSource::Computed);

    let fifth = assign_level(&config, None, ranking(5, 100)).unwrap();
    assert_eq!(fifth.code, "A");

    let thirtieth = assign_level(&config, None, ranking(30, 100)).unwrap();
    assert_eq!(thirtieth.code, "B+");

    let last = assign_level(&config, None, ranking(100, 100)).unwrap();
    assert_eq!(last.code, "C");
    assert_eq!(last.index, Some(5));
}

#[test]
fn test_imported_grade_is_authoritative() {
    let config = GradeLevelConfig::default_six_level();

    let level = assign_level(&config, Some("B"), ranking(1, 100)).unwrap();
    assert_eq!(level.code, "B");
    assert_eq!(level.label, "良好");
    assert_eq!(level.source, LevelSource::Imported);

    let unknown = assign_level(&config, Some("优"), None).unwrap();
    assert_eq!(unknown.code, "优");
    assert_eq!(unknown.index, None);

    assert!(assign_level(&config, None, None).is_none());
    assert!(assign_level(&config, Some("  "), None).is_none());
}

#[tokio::test]
async fn test_level_cache_loads_and_expires() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = LevelConfigCache::new(store.clone(), Duration::minutes(5), clock.clone());

    let first = cache.get("default").await.unwrap();
    assert_eq!(first.levels.len(), 6);

    let custom = GradeLevelConfig::new(
        "default",
        "两级",
        vec![
            GradeLevel::new("P", "通过", 0.0, 0.6, "#10b981", ""),
            GradeLevel::new("F", "未通过", 0.6, 1.0, "#ef4444", ""),
        ],
    )
    .unwrap();
    store.save_level_config(&custom).await.unwrap();

    // Still the cached snapshot until the entry expires
    assert_eq!(cache.get("default").await.unwrap().levels.len(), 6);
    clock.advance(Duration::minutes(6));
    assert_eq!(cache.get("default").await.unwrap().levels.len(), 2);

    // Snapshots handed out earlier are never mutated
    assert_eq!(first.levels.len(), 6);
}

#[tokio::test]
async fn test_level_cache_save_and_invalidate() {
    let store = Arc::new(MemoryStore::new());
    let cache = LevelConfigCache::with_ttl_secs(store.clone(), 300);

    assert!(cache.get("missing").await.is_err());

    let mut nine = GradeLevelConfig::nine_tier();
    nine.id = "school-nine".to_string();
    cache.save(nine).await.unwrap();
    assert_eq!(cache.get("school-nine").await.unwrap().levels.len(), 9);

    assert!(cache.invalidate("school-nine"));
    assert!(!cache.invalidate("school-nine"));
    assert_eq!(cache.get("school-nine").await.unwrap().levels.len(), 9);
}
