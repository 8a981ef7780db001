//! Tests for the identity resolver

use super::*;
use crate::Error;
use crate::app::adapters::stores::IdentityStore;
use crate::app::models::MatchType;
use crate::app::services::identity_resolver::{mint_student_id, similarity};

#[tokio::test]
async fn test_exact_student_id_wins() {
    let store = create_test_store().await;
    let mut resolver = create_test_resolver(store);

    let resolution = resolver
        .resolve(&create_test_candidate(Some("001"), Some("不相干"), Some("高三9班")))
        .await
        .unwrap();

    assert_eq!(resolution.match_type, MatchType::Exact);
    assert_eq!(resolution.confidence, 1.0);
    assert_eq!(resolution.identity.name, "张三");
}

#[tokio::test]
async fn test_name_and_class_match_ignores_formatting() {
    let store = create_test_store().await;
    let mut resolver = create_test_resolver(store);

    let resolution = resolver
        .resolve(&create_test_candidate(None, Some("张 三"), Some("高一(1)班")))
        .await
        .unwrap();
    assert_eq!(resolution.match_type, MatchType::Exact);
    assert_eq!(resolution.identity.student_id, "001");

}

#[tokio::test]
async fn test_unknown_id_takes_over_minted_student_only() {
    let store = create_test_store().await;
    let minted = StudentIdentity {
        minted: true,
        ..StudentIdentity::new(mint_student_id("王五", "高一3班"), "王五", "高一3班")
    };
    store.insert_if_absent(minted.clone()).await.unwrap();
    let mut resolver = create_test_resolver(store.clone());

    // An id the store does not know falls through to a minted name match
    let resolution = resolver
        .resolve(&create_test_candidate(Some("999"), Some("王五"), Some("高一3班")))
        .await
        .unwrap();
    assert_eq!(resolution.identity, minted);
    assert_eq!(resolution.confidence, 0.95);

    // but never to a student stored under another explicit id
    let resolution = resolver
        .resolve(&create_test_candidate(Some("998"), Some("李四"), Some("高一1班")))
        .await
        .unwrap();
    assert_eq!(resolution.match_type, MatchType::New);
    assert_eq!(resolution.identity.student_id, "998");
    assert_eq!(store.identity_count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_same_name_and_class_with_different_ids_stay_apart() {
    let store = Arc::new(MemoryStore::new());
    let mut resolver = create_test_resolver(store.clone());

    let first = resolver
        .resolve(&create_test_candidate(Some("001"), Some("王伟"), Some("高一1班")))
        .await
        .unwrap();
    let second = resolver
        .resolve(&create_test_candidate(Some("002"), Some("王伟"), Some("高一1班")))
        .await
        .unwrap();

    assert_eq!(first.identity.student_id, "001");
    assert_eq!(second.identity.student_id, "002");
    assert_eq!(second.match_type, MatchType::New);
    assert_eq!(store.identity_count().await.unwrap(), 2);

    // Repeating either row finds its own student
    let again = resolver
        .resolve(&create_test_candidate(Some("002"), Some("王伟"), Some("高一1班")))
        .await
        .unwrap();
    assert_eq!(again.identity.student_id, "002");
    assert_eq!(again.match_type, MatchType::Exact);
}

#[tokio::test]
async fn test_fuzzy_match_skips_other_explicit_ids() {
    let store = create_test_store().await;
    let mut resolver = create_test_resolver(store);

    let resolution = resolver
        .resolve(&create_test_candidate(Some("777"), Some("Zhang Shan"), Some("高一2班")))
        .await
        .unwrap();
    assert_eq!(resolution.match_type, MatchType::New);
    assert_eq!(resolution.identity.student_id, "777");
}

#[tokio::test]
async fn test_fuzzy_match_within_class() {
    let store = create_test_store().await;
    let mut resolver = create_test_resolver(store.clone());

    let resolution = resolver
        .resolve(&create_test_candidate(None, Some("Zhang Shan"), Some("高一2班")))
        .await
        .unwrap();

    assert_eq!(resolution.match_type, MatchType::Fuzzy);
    assert_eq!(resolution.identity.student_id, "003");
    let expected = 0.7 * similarity("Zhang Shan", "Zhang San") + 0.3;
    assert!((resolution.confidence - expected).abs() < 1e-9);
    assert_eq!(store.identity_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_fuzzy_match_needs_same_class() {
    let store = create_test_store().await;
    let mut resolver = create_test_resolver(store);

    let resolution = resolver
        .resolve(&create_test_candidate(None, Some("Zhang Shan"), Some("高一1班")))
        .await
        .unwrap();
    assert_eq!(resolution.match_type, MatchType::New);
}

#[tokio::test]
async fn test_fuzzy_disabled_mints() {
    let store = create_test_store().await;
    let mut config = IdentityConfig::default();
    config.enable_fuzzy = false;
    let mut resolver = IdentityResolver::new(store, config);

    let resolution = resolver
        .resolve(&create_test_candidate(None, Some("Zhang Shan"), Some("高一2班")))
        .await
        .unwrap();
    assert_eq!(resolution.match_type, MatchType::New);
}

#[tokio::test]
async fn test_short_names_do_not_fuzzy_match() {
    let store = create_test_store().await;
    let mut resolver = create_test_resolver(store);

    let resolution = resolver
        .resolve(&create_test_candidate(None, Some("张四"), Some("高一1班")))
        .await
        .unwrap();
    assert_eq!(resolution.match_type, MatchType::New);
    assert!(similarity("张四", "张三") < 0.8);
}

#[tokio::test]
async fn test_minting_is_deterministic_and_idempotent() {
    let store = create_test_store().await;
    let candidate = create_test_candidate(None, Some("王五"), Some("高一3班"));

    let mut first = create_test_resolver(store.clone());
    let created = first.resolve(&candidate).await.unwrap();
    assert_eq!(created.match_type, MatchType::New);
    assert!(created.identity.minted);
    assert!(created.identity.student_id.starts_with("auto_"));
    assert_eq!(
        created.identity.student_id,
        mint_student_id("王五", "高一3班")
    );

    let again = first.resolve(&candidate).await.unwrap();
    assert_eq!(again.identity, created.identity);

    let mut second = create_test_resolver(store.clone());
    let later = second.resolve(&candidate).await.unwrap();
    assert_eq!(later.identity, created.identity);
    assert_eq!(later.match_type, MatchType::Exact);

    assert_eq!(store.identity_count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_unknown_id_with_name_keeps_source_id() {
    let store = create_test_store().await;
    let mut resolver = create_test_resolver(store);

    let resolution = resolver
        .resolve(&create_test_candidate(Some("010"), Some("王五"), Some("高一3班")))
        .await
        .unwrap();
    assert_eq!(resolution.match_type, MatchType::New);
    assert_eq!(resolution.identity.student_id, "010");
    assert!(!resolution.identity.minted);
}

#[tokio::test]
async fn test_missing_class_uses_default() {
    let store = create_test_store().await;
    let mut resolver = create_test_resolver(store);

    let resolution = resolver
        .resolve(&create_test_candidate(None, Some("赵六"), None))
        .await
        .unwrap();
    assert_eq!(resolution.identity.class_name, "未知班级");
}

#[tokio::test]
async fn test_unresolvable_candidates_are_recoverable() {
    let store = create_test_store().await;
    let mut resolver = create_test_resolver(store.clone());

    let error = resolver
        .resolve(&create_test_candidate(None, None, Some("高一1班")))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::IdentityResolution { .. }));

    let error = resolver
        .resolve(&create_test_candidate(Some("404"), None, None))
        .await
        .unwrap_err();
    assert!(error.is_recoverable());

    let mut strict = create_test_resolver(store).with_create_missing(false);
    let error = strict
        .resolve(&create_test_candidate(None, Some("王五"), Some("高一3班")))
        .await
        .unwrap_err();
    assert!(error.to_string().contains("disabled"));
}

#[tokio::test]
async fn test_memo_survives_export_and_import() {
    let store = create_test_store().await;
    let candidate = create_test_candidate(None, Some("王五"), Some("高一3班"));

    let mut original = create_test_resolver(store.clone());
    let created = original.resolve(&candidate).await.unwrap();
    let memo = original.export_memo();
    assert_eq!(memo.len(), 1);

    let mut resumed = create_test_resolver(store.clone());
    resumed.import_memo(memo);
    assert_eq!(resumed.memo_len(), 1);

    let resolution = resumed.resolve(&candidate).await.unwrap();
    assert_eq!(resolution.identity, created.identity);
    assert_eq!(store.identity_count().await.unwrap(), 4);
}
