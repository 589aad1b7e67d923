//! Staleness and cascade behaviour of the derived-result cache.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use lexgate_core::ManualClock;
use lexgate_server::cache::{CacheScope, DerivedResultCache, ResultKind, SourceState};
use lexgate_storage::mocks::UnavailableBackend;
use lexgate_storage::{KeyValueStore, MemoryBackend};
use serde::{Deserialize, Serialize};

const TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FullAnalysis {
    word_count: u32,
    character_count: u32,
    sentence_count: u32,
}

fn setup(start: i64) -> (DerivedResultCache, KeyValueStore, ManualClock) {
    let clock = ManualClock::new(start);
    let store = KeyValueStore::new(Arc::new(MemoryBackend::with_clock(Arc::new(clock.clone()))));
    let cache = DerivedResultCache::new(store.clone()).with_clock(Arc::new(clock.clone()));
    (cache, store, clock)
}

#[tokio::test]
async fn test_modified_entity_misses_with_entry_untouched() {
    let (cache, store, _) = setup(105);

    let derived_at = cache.store("E", ResultKind::WordCount, &42u32, TTL).await;
    assert_eq!(derived_at, 105);

    let source = SourceState::new("E", 100).with_last_derived_at(derived_at);
    assert_eq!(cache.lookup::<u32>(ResultKind::WordCount, &source).await, Some(42));

    let modified = SourceState::new("E", 110).with_last_derived_at(derived_at);
    assert_eq!(cache.lookup::<u32>(ResultKind::WordCount, &modified).await, None);
    assert!(store.exists("word_count:E").await);
}

#[tokio::test]
async fn test_bulk_derivation_removes_per_kind_entries() {
    let (cache, _, clock) = setup(100);

    let wc = cache.store("E", ResultKind::WordCount, &7u32, TTL).await;
    let source = SourceState::new("E", 50).with_last_derived_at(wc);
    assert_eq!(cache.lookup::<u32>(ResultKind::WordCount, &source).await, Some(7));

    clock.set(200);
    let analysis = FullAnalysis {
        word_count: 7,
        character_count: 31,
        sentence_count: 2,
    };
    let derived = cache
        .get_or_compute_combined(
            ResultKind::FullAnalysis,
            &source,
            TTL,
            &ResultKind::INDIVIDUAL,
            || async { Ok::<_, Infallible>(analysis.clone()) },
        )
        .await
        .unwrap();
    assert!(!derived.cache_hit);
    assert_eq!(derived.derived_at, 200);

    let source = SourceState::new("E", 50).with_last_derived_at(derived.derived_at);
    assert_eq!(cache.lookup::<u32>(ResultKind::WordCount, &source).await, None);
    assert_eq!(
        cache.lookup::<FullAnalysis>(ResultKind::FullAnalysis, &source).await,
        Some(analysis)
    );
}

#[tokio::test]
async fn test_stale_bulk_entry_is_recomputed() {
    let (cache, _, clock) = setup(100);
    let source = SourceState::new("E", 90);

    let first = cache
        .get_or_compute_combined(
            ResultKind::FullAnalysis,
            &source,
            TTL,
            &ResultKind::INDIVIDUAL,
            || async { Ok::<_, Infallible>(1u32) },
        )
        .await
        .unwrap();

    // The text is edited after the analysis ran.
    clock.set(300);
    let edited = SourceState::new("E", 250).with_last_derived_at(first.derived_at);
    let second = cache
        .get_or_compute_combined(
            ResultKind::FullAnalysis,
            &edited,
            TTL,
            &ResultKind::INDIVIDUAL,
            || async { Ok::<_, Infallible>(2u32) },
        )
        .await
        .unwrap();

    assert!(!second.cache_hit);
    assert_eq!(second.value, 2);
    assert_eq!(second.derived_at, 300);
}

#[tokio::test]
async fn test_invalidate_all_on_text_update() {
    let (cache, store, _) = setup(1_000);
    for kind in ResultKind::ALL {
        cache.store("t7", kind, &0u32, TTL).await;
    }
    store.set("text:t7:owner", &"cached body", None).await;
    store.set("user_texts:owner:1:20:created_at", &"page", None).await;
    store.set("user_text_count:owner", &12u32, None).await;

    cache
        .invalidate_all("t7", &CacheScope::text_dependents("t7", "owner"))
        .await;

    for kind in ResultKind::ALL {
        assert!(!store.exists(&kind.cache_key("t7")).await);
    }
    assert!(!store.exists("text:t7:owner").await);
    assert!(!store.exists("user_texts:owner:1:20:created_at").await);
    assert!(!store.exists("user_text_count:owner").await);
}

#[tokio::test]
async fn test_unavailable_store_computes_every_time() {
    let store = KeyValueStore::new(Arc::new(UnavailableBackend::new()));
    let cache = DerivedResultCache::new(store).with_clock(Arc::new(ManualClock::new(500)));
    let source = SourceState::new("E", 100).with_last_derived_at(400);

    let derived = cache
        .get_or_compute(ResultKind::SentenceCount, &source, TTL, || async {
            Ok::<_, Infallible>(3u32)
        })
        .await
        .unwrap();
    assert!(!derived.cache_hit);
    assert_eq!(derived.value, 3);

    // Invalidation against a dead store is a silent no-op.
    assert_eq!(
        cache
            .invalidate_siblings("E", &ResultKind::INDIVIDUAL)
            .await,
        0
    );
}
