//! End-to-end freshness behaviour of `MemoCache` over every store.

use std::sync::Arc;
use std::time::Duration;

use memocache_test_utils::assertions::{assert_fresh_value, assert_miss, assert_stale_value};
use memocache_test_utils::fixtures::{self, ada, UserRecord};
use memocache_test_utils::{
    FreshnessPolicy, KvStore, MemoCache, MockClock, StoreOutcome, StoredError,
};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[tokio::test]
async fn test_scenario_fresh_stale_then_miss_on_every_store() {
    for (store, _guard) in fixtures::all_stores() {
        let backend = store.name().to_string();
        let clock = MockClock::new();
        let cache = fixtures::cache_over(store, &clock, fixtures::scenario_policy());
        let key = cache.key_for(&("k",)).expect("key should build");

        assert_eq!(
            cache.store(&key, &Ok::<i32, String>(1)).await,
            StoreOutcome::Written,
            "{backend}"
        );

        clock.advance_millis(10);
        let lookup = cache.load::<i32>(&key).await.expect("load should succeed");
        assert_eq!(lookup.into_parts(), (Some(1), true, true, None), "{backend} at 10ms");

        clock.advance_millis(110);
        let lookup = cache.load::<i32>(&key).await.expect("load should succeed");
        assert_eq!(lookup.into_parts(), (Some(1), true, false, None), "{backend} at 120ms");

        clock.advance_millis(80);
        let lookup = cache.load::<i32>(&key).await.expect("load should succeed");
        assert_eq!(lookup.into_parts(), (None, false, false, None), "{backend} at 200ms");
    }
}

#[tokio::test]
async fn test_window_boundaries() {
    let clock = MockClock::new();
    let cache = fixtures::cache_over(
        Arc::new(memocache_test_utils::MemoryStore::new()),
        &clock,
        fixtures::scenario_policy(),
    );
    let key = cache.key_for(&()).expect("key should build");
    cache.store_value(&key, &"v").await;

    // Exactly at the TTL the entry is still alive.
    clock.advance_millis(100);
    assert_fresh_value(
        &cache.load::<String>(&key).await.expect("load"),
        &"v".to_string(),
    );

    clock.advance_millis(1);
    assert_stale_value(
        &cache.load::<String>(&key).await.expect("load"),
        &"v".to_string(),
    );

    // Exactly at TTL + reuse the entry is gone.
    clock.advance_millis(49);
    assert_miss(&cache.load::<String>(&key).await.expect("load"));
}

#[tokio::test]
async fn test_round_trip_structured_value() {
    for (store, _guard) in fixtures::all_stores() {
        let clock = MockClock::new();
        let cache = fixtures::cache_over(
            store,
            &clock,
            FreshnessPolicy::new().with_ttl(Duration::from_secs(60)),
        );
        let key = cache.key_for(&(1u64, "profile")).expect("key should build");

        cache.store(&key, &Ok::<_, String>(ada())).await;
        let lookup = cache.load::<UserRecord>(&key).await.expect("load should succeed");
        assert_eq!(lookup.into_parts(), (Some(ada()), true, true, None));
    }
}

#[tokio::test]
async fn test_error_suppressed_when_err_ttl_zero() {
    for (store, _guard) in fixtures::all_stores() {
        let clock = MockClock::new();
        let cache = fixtures::cache_over(store, &clock, FreshnessPolicy::new());
        let key = cache.key_for(&(42,)).expect("key should build");

        let outcome = cache.store(&key, &Err::<i32, _>("upstream down")).await;
        assert_eq!(outcome, StoreOutcome::Skipped);

        let lookup = cache.load::<i32>(&key).await.expect("load should succeed");
        assert_eq!(lookup.into_parts(), (None, false, false, None));
    }
}

#[tokio::test]
async fn test_error_suppressed_when_err_ttl_disabled() {
    let clock = MockClock::new();
    let cache = fixtures::cache_over(
        Arc::new(memocache_test_utils::MemoryStore::new()),
        &clock,
        FreshnessPolicy::new().with_ttl(ms(100)).with_err_ttl(None),
    );
    let key = cache.key_for(&(42,)).expect("key should build");

    assert_eq!(
        cache.store(&key, &Err::<i32, _>("nope")).await,
        StoreOutcome::Skipped
    );
    assert_miss(&cache.load::<i32>(&key).await.expect("load"));
}

#[tokio::test]
async fn test_cached_error_then_stale_then_miss() {
    let clock = MockClock::new();
    let cache = fixtures::cache_over(
        Arc::new(memocache_test_utils::MemoryStore::new()),
        &clock,
        FreshnessPolicy::new()
            .with_ttl(ms(100))
            .with_err_ttl(Some(ms(40)))
            .with_reuse_ttl(ms(50)),
    );
    let key = cache.key_for(&("flaky",)).expect("key should build");
    cache.store(&key, &Err::<i32, _>("rate limited")).await;

    clock.advance_millis(20);
    let lookup = cache.load::<i32>(&key).await.expect("load");
    assert_eq!(
        lookup.into_parts(),
        (None, true, true, Some(StoredError::new("rate limited")))
    );

    // Past the error window but inside ttl + reuse: stale, no error surfaced
    // and no value to serve, since the failed call returned none.
    clock.advance_millis(40);
    let lookup = cache.load::<i32>(&key).await.expect("load");
    assert_eq!(lookup.into_parts(), (None, true, false, None));

    clock.advance_millis(100);
    assert_miss(&cache.load::<i32>(&key).await.expect("load"));
}

#[tokio::test]
async fn test_value_with_error_on_every_store() {
    for (store, _guard) in fixtures::all_stores() {
        let backend = store.name().to_string();
        let clock = MockClock::new();
        let cache = fixtures::cache_over(
            store,
            &clock,
            FreshnessPolicy::new()
                .with_ttl(ms(100))
                .with_err_ttl(Some(ms(40)))
                .with_reuse_ttl(ms(50)),
        );
        let key = cache.key_for(&("k",)).expect("key should build");

        assert_eq!(
            cache.store_parts(&key, &5, Some("someError")).await,
            StoreOutcome::Written,
            "{backend}"
        );

        clock.advance_millis(20);
        let lookup = cache.load::<i32>(&key).await.expect("load should succeed");
        assert_eq!(
            lookup.into_parts(),
            (Some(5), true, true, Some(StoredError::new("someError"))),
            "{backend} at 20ms"
        );

        clock.advance_millis(40);
        let lookup = cache.load::<i32>(&key).await.expect("load should succeed");
        assert_eq!(lookup.into_parts(), (Some(5), true, false, None), "{backend} at 60ms");

        clock.advance_millis(100);
        assert_miss(&cache.load::<i32>(&key).await.expect("load should succeed"));
    }
}

#[tokio::test]
async fn test_success_overwrites_cached_error() {
    let clock = MockClock::new();
    let cache = fixtures::cache_over(
        Arc::new(memocache_test_utils::MemoryStore::new()),
        &clock,
        FreshnessPolicy::new()
            .with_ttl(ms(100))
            .with_err_ttl(Some(ms(100))),
    );
    let key = cache.key_for(&(7,)).expect("key should build");

    cache.store(&key, &Err::<i32, _>("first try failed")).await;
    cache.store(&key, &Ok::<i32, String>(7)).await;

    assert_fresh_value(&cache.load::<i32>(&key).await.expect("load"), &7);
}

#[tokio::test]
async fn test_restamp_on_overwrite() {
    let clock = MockClock::new();
    let cache = fixtures::cache_over(
        Arc::new(memocache_test_utils::MemoryStore::new()),
        &clock,
        FreshnessPolicy::new().with_ttl(ms(100)),
    );
    let key = cache.key_for(&()).expect("key should build");

    cache.store_value(&key, &1).await;
    clock.advance_millis(90);
    cache.store_value(&key, &2).await;
    clock.advance_millis(90);

    assert_fresh_value(&cache.load::<i32>(&key).await.expect("load"), &2);
}

#[tokio::test]
async fn test_clear_makes_every_key_miss() {
    for (store, _guard) in fixtures::all_stores() {
        let clock = MockClock::new();
        let cache: MemoCache = fixtures::cache_over(store, &clock, FreshnessPolicy::new());

        let mut keys = Vec::new();
        for i in 0..10u32 {
            let key = cache.key_for(&(i,)).expect("key should build");
            cache.store_value(&key, &i).await;
            keys.push(key);
        }

        assert!(cache.clear().await);
        for key in &keys {
            assert_miss(&cache.load::<u32>(key).await.expect("load"));
        }

        // Clearing an empty table still succeeds.
        assert!(cache.clear().await);
    }
}

#[tokio::test]
async fn test_two_namespaces_share_a_store() {
    let clock = MockClock::new();
    let store: Arc<dyn KvStore> = Arc::new(memocache_test_utils::MemoryStore::new());
    let users = MemoCache::builder("getUser")
        .store(store.clone())
        .clock(clock.clone())
        .build()
        .expect("cache should build");
    let orders = MemoCache::builder("getOrder")
        .store(store)
        .clock(clock.clone())
        .build()
        .expect("cache should build");

    let user_key = users.key_for(&(1,)).expect("key");
    let order_key = orders.key_for(&(1,)).expect("key");
    assert_ne!(user_key, order_key);

    users.store_value(&user_key, &"ada").await;
    orders.store_value(&order_key, &"order-1").await;

    assert_fresh_value(
        &users.load::<String>(&user_key).await.expect("load"),
        &"ada".to_string(),
    );
    assert_fresh_value(
        &orders.load::<String>(&order_key).await.expect("load"),
        &"order-1".to_string(),
    );
}

#[tokio::test]
async fn test_stats_track_lookups_and_stores() {
    let clock = MockClock::new();
    let cache = fixtures::cache_over(
        Arc::new(memocache_test_utils::MemoryStore::new()),
        &clock,
        fixtures::scenario_policy(),
    );
    let key = cache.key_for(&()).expect("key");

    cache.load::<i32>(&key).await.expect("load");
    cache.store_value(&key, &1).await;
    cache.store(&key, &Err::<i32, _>("skipped")).await;
    cache.load::<i32>(&key).await.expect("load");
    clock.advance_millis(120);
    cache.load::<i32>(&key).await.expect("load");

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.fresh_hits, 1);
    assert_eq!(stats.stale_hits, 1);
    assert_eq!(stats.stores_written, 1);
    assert_eq!(stats.stores_skipped, 1);
    assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 0.001);
}
