//! memocache Test Utilities
//!
//! Centralized test infrastructure for the memocache workspace:
//! - Proptest generators for policies, namespaces and call arguments
//! - Test fixtures for caches over every store
//! - [`FlakyStore`], a store wrapper with switchable failures
//! - Custom assertions for lookup results

pub use memocache_core::{
    CacheSettings, CodecError, ConfigError, Envelope, Freshness, FreshnessPolicy, HashBucket,
    KeyCanonicalizer, KeyPolicy, Lookup, MemoError, MemoResult, MockClock, Outcome, StorageError,
    StorageKey, StoredError,
};
pub use memocache_storage::{
    CacheStats, KvStore, LmdbStore, MemoCache, MemoryStore, SqliteStore, StoreOutcome,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// FAILURE INJECTION
// ============================================================================

/// Store wrapper whose reads, writes and deletes can be made to fail.
///
/// Failures are switched at runtime, so one cache can be driven through
/// healthy and broken phases in a single test.
pub struct FlakyStore {
    inner: Arc<dyn KvStore>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    writes_attempted: AtomicU64,
}

impl FlakyStore {
    /// Wrap a fresh [`MemoryStore`].
    pub fn new() -> Self {
        Self::wrap(Arc::new(MemoryStore::new()))
    }

    pub fn wrap(inner: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            writes_attempted: AtomicU64::new(0),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of upserts that reached this store, failed or not.
    pub fn writes_attempted(&self) -> u64 {
        self.writes_attempted.load(Ordering::SeqCst)
    }

    fn injected(op: &str) -> MemoError {
        StorageError::backend("flaky", format!("injected {op} failure")).into()
    }
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn upsert(&self, key: &StorageKey, value: &[u8]) -> MemoResult<()> {
        self.writes_attempted.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::injected("write"));
        }
        self.inner.upsert(key, value).await
    }

    async fn get_by_key(&self, key: &StorageKey) -> MemoResult<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::injected("read"));
        }
        self.inner.get_by_key(key).await
    }

    async fn delete(&self, key: &StorageKey) -> MemoResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(key).await
    }

    async fn delete_all(&self) -> MemoResult<u64> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete_all().await
    }

    async fn drop_storage(&self) -> MemoResult<()> {
        self.inner.drop_storage().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for memocache types.

    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Generate a non-empty namespace that fits any key policy.
    pub fn arb_namespace() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9_.]{0,31}"
    }

    /// Generate a duration in whole milliseconds, zero included.
    pub fn arb_window() -> impl Strategy<Value = Duration> {
        prop_oneof![
            Just(Duration::ZERO),
            (1u64..10_000).prop_map(Duration::from_millis),
        ]
    }

    /// Generate an error TTL covering all three settings.
    pub fn arb_err_ttl() -> impl Strategy<Value = Option<Duration>> {
        prop_oneof![
            Just(None),
            Just(Some(Duration::ZERO)),
            (1u64..10_000).prop_map(|ms| Some(Duration::from_millis(ms))),
        ]
    }

    /// Generate a valid FreshnessPolicy.
    pub fn arb_freshness_policy() -> impl Strategy<Value = FreshnessPolicy> {
        (arb_window(), arb_err_ttl(), arb_window()).prop_map(|(ttl, err_ttl, reuse_ttl)| {
            FreshnessPolicy::new()
                .with_ttl(ttl)
                .with_err_ttl(err_ttl)
                .with_reuse_ttl(reuse_ttl)
        })
    }

    /// Generate a max_hash_key_len hitting every hash bucket.
    pub fn arb_max_hash_key_len() -> impl Strategy<Value = usize> {
        prop_oneof![
            Just(0usize),
            1usize..=8,
            9usize..=32,
            33usize..=64,
            65usize..=512,
        ]
    }

    /// Generate a valid KeyPolicy.
    pub fn arb_key_policy() -> impl Strategy<Value = KeyPolicy> {
        (arb_namespace(), arb_max_hash_key_len())
            .prop_map(|(ns, max)| KeyPolicy::new(ns).with_max_hash_key_len(max))
    }

    /// Generate a map argument with string keys.
    pub fn arb_filter_map() -> impl Strategy<Value = BTreeMap<String, i64>> {
        prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8)
    }

    /// Generate a single-argument tuple of mixed scalar content.
    pub fn arb_user_query() -> impl Strategy<Value = (u64, String, bool)> {
        (any::<u64>(), "[ -~]{0,64}", any::<bool>())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built caches and stores for common scenarios.

    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Value type cached in most tests.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct UserRecord {
        pub id: u64,
        pub name: String,
        pub roles: Vec<String>,
    }

    pub fn ada() -> UserRecord {
        UserRecord {
            id: 1,
            name: "Ada Lovelace".to_string(),
            roles: vec!["admin".to_string(), "analyst".to_string()],
        }
    }

    /// Success TTL 100ms, reuse window 50ms, errors not cached.
    pub fn scenario_policy() -> FreshnessPolicy {
        FreshnessPolicy::new()
            .with_ttl(Duration::from_millis(100))
            .with_reuse_ttl(Duration::from_millis(50))
    }

    /// Build a cache over `store` driven by `clock`.
    pub fn cache_over(
        store: Arc<dyn KvStore>,
        clock: &MockClock,
        policy: FreshnessPolicy,
    ) -> MemoCache {
        MemoCache::builder("getUser")
            .store(store)
            .clock(clock.clone())
            .policy(policy)
            .build()
            .expect("fixture cache should build")
    }

    /// An LMDB store in a fresh temporary directory.
    pub fn lmdb_store() -> (Arc<LmdbStore>, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LmdbStore::open(temp_dir.path(), 16).expect("Failed to open LMDB store");
        (Arc::new(store), temp_dir)
    }

    /// A file-backed SQLite store in a fresh temporary directory.
    pub fn sqlite_store() -> (Arc<SqliteStore>, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = SqliteStore::open(temp_dir.path().join("memocache.db"))
            .expect("Failed to open SQLite store");
        (Arc::new(store), temp_dir)
    }

    /// One instance of every store, each paired with whatever keeps it alive.
    pub fn all_stores() -> Vec<(Arc<dyn KvStore>, Option<TempDir>)> {
        let (lmdb, lmdb_dir) = lmdb_store();
        let (sqlite, sqlite_dir) = sqlite_store();
        vec![
            (Arc::new(MemoryStore::new()) as Arc<dyn KvStore>, None),
            (lmdb as Arc<dyn KvStore>, Some(lmdb_dir)),
            (sqlite as Arc<dyn KvStore>, Some(sqlite_dir)),
        ]
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over lookups and errors.

    use super::*;
    use std::fmt::Debug;

    /// Assert that a lookup is fresh and carries `expected`.
    #[track_caller]
    pub fn assert_fresh_value<T: Debug + PartialEq>(lookup: &Lookup<T>, expected: &T) {
        match lookup {
            Lookup::Fresh(Outcome::Value(value)) => assert_eq!(value, expected),
            other => panic!("Expected fresh value {:?}, got: {:?}", expected, other),
        }
    }

    /// Assert that a lookup is stale and carries `expected`.
    #[track_caller]
    pub fn assert_stale_value<T: Debug + PartialEq>(lookup: &Lookup<T>, expected: &T) {
        match lookup {
            Lookup::Stale(Outcome::Value(value)) => assert_eq!(value, expected),
            other => panic!("Expected stale value {:?}, got: {:?}", expected, other),
        }
    }

    /// Assert that a lookup is a miss.
    #[track_caller]
    pub fn assert_miss<T: Debug>(lookup: &Lookup<T>) {
        assert!(
            matches!(lookup, Lookup::Miss),
            "Expected miss, got: {:?}",
            lookup
        );
    }

    /// Assert that a MemoResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: Debug>(result: &MemoResult<T>) {
        match result {
            Err(MemoError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a MemoResult is a Codec error.
    #[track_caller]
    pub fn assert_codec_error<T: Debug>(result: &MemoResult<T>) {
        match result {
            Err(MemoError::Codec(_)) => {}
            other => panic!("Expected Codec error, got: {:?}", other),
        }
    }

    /// Assert that the key body after the namespace respects `max_hash_key_len`.
    #[track_caller]
    pub fn assert_key_bounded(key: &StorageKey, namespace: &str, max_hash_key_len: usize) {
        let body = key
            .as_str()
            .strip_prefix(namespace)
            .unwrap_or_else(|| panic!("Key {key} does not start with {namespace}"));
        if max_hash_key_len > 0 {
            let bound = max_hash_key_len.max(HashBucket::for_limit(max_hash_key_len).hex_len());
            assert!(
                body.len() <= bound,
                "Key body of {} bytes exceeds bound {}",
                body.len(),
                bound
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixture_policy_is_valid() {
        fixtures::scenario_policy()
            .validate()
            .expect("scenario policy should be valid");
    }

    #[tokio::test]
    async fn test_flaky_store_switches() {
        let store = FlakyStore::new();
        let key = StorageKey::new("k").expect("key should be valid");

        store.upsert(&key, b"v").await.expect("healthy write should succeed");

        store.fail_writes(true);
        assertions::assert_storage_error(&store.upsert(&key, b"w").await);
        assert_eq!(store.writes_attempted(), 2);

        store.fail_reads(true);
        assertions::assert_storage_error(&store.get_by_key(&key).await);

        store.fail_reads(false);
        let row = store.get_by_key(&key).await.expect("read should succeed");
        assert_eq!(row.as_deref(), Some(&b"v"[..]));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_policies_are_valid(policy in generators::arb_freshness_policy()) {
            prop_assert!(policy.validate().is_ok());
        }

        #[test]
        fn prop_generated_key_policies_are_valid(policy in generators::arb_key_policy()) {
            prop_assert!(policy.validate().is_ok());
        }
    }
}
