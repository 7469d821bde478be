//! Freshness engine.
//!
//! [`MemoCache`] ties a [`KvStore`] to a [`FreshnessPolicy`]. It stores the
//! outcome of a memoized call as an [`Envelope`] and, on lookup, re-derives
//! whether that envelope is fresh, stale or expired from its age.
//!
//! # Design
//!
//! - The write path is advisory. [`MemoCache::store`], [`MemoCache::clear`]
//!   and [`MemoCache::remove`] log failures and report them in their return
//!   value, but never return `Err`.
//! - The read path surfaces every storage and codec failure as
//!   [`MemoError`](memocache_core::MemoError).
//! - Lookups on one instance are serialized by a single async mutex. Stores
//!   take no lock; concurrent writes to the same key rely on the store's
//!   atomic upsert.
//! - Expired rows are never deleted by a lookup. They stay until overwritten
//!   or cleared.

use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use memocache_core::{
    CacheSettings, CallArgs, Clock, ConfigError, Envelope, Freshness, FreshnessPolicy, JsonCodec,
    KeyCanonicalizer, KeyPolicy, Lookup, MemoResult, Outcome, StorageKey, SystemClock,
    ValueCodec,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use crate::stats::{CacheStats, StatsRecorder};
use crate::store::KvStore;

/// What [`MemoCache::store`] did with an outcome.
///
/// Informational only. A failed write is already logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOutcome {
    /// The envelope was written.
    Written,
    /// Nothing was written because failed calls are not cached.
    Skipped,
    /// Encoding or writing failed.
    Failed,
}

impl StoreOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written)
    }
}

/// Memoization cache over a durable key-value store.
///
/// # Example
///
/// ```ignore
/// let cache = MemoCache::builder("getUser")
///     .store(Arc::new(SqliteStore::open("cache.db")?))
///     .ttl(Duration::from_secs(60))
///     .reuse_ttl(Duration::from_secs(30))
///     .build()?;
///
/// let key = cache.key_for(&(user_id,))?;
/// match cache.load::<User>(&key).await? {
///     Lookup::Fresh(outcome) => outcome.into_result(),
///     Lookup::Stale(outcome) => { refresh_in_background(key); outcome.into_result() }
///     Lookup::Miss => {
///         let result = fetch_user(user_id).await;
///         cache.store(&key, &result).await;
///         result
///     }
/// }
/// ```
pub struct MemoCache<C: ValueCodec = JsonCodec> {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    keys: KeyCanonicalizer,
    policy: FreshnessPolicy,
    codec: C,
    load_lock: Mutex<()>,
    stats: StatsRecorder,
}

impl MemoCache<JsonCodec> {
    pub fn builder(namespace: impl Into<String>) -> MemoCacheBuilder<JsonCodec> {
        MemoCacheBuilder::new(namespace)
    }
}

impl<C: ValueCodec> MemoCache<C> {
    /// Canonical storage key for a call with `args`.
    pub fn key_for<A: CallArgs + ?Sized>(&self, args: &A) -> MemoResult<StorageKey> {
        self.keys.canonicalize(args)
    }

    /// Record the outcome of a memoized call under `key`.
    ///
    /// An `Err` is written only when the policy caches errors. The row is
    /// stamped with the current time whenever the policy tracks age.
    pub async fn store<T, E>(&self, key: &StorageKey, outcome: &Result<T, E>) -> StoreOutcome
    where
        T: Serialize,
        E: Display,
    {
        match outcome {
            Ok(value) => self.store_value(key, value).await,
            Err(err) => self.store_error(key, err).await,
        }
    }

    /// Record a successful result.
    pub async fn store_value<T: Serialize + ?Sized>(
        &self,
        key: &StorageKey,
        value: &T,
    ) -> StoreOutcome {
        let Some(value_bytes) = self.encode_value(key, value) else {
            return StoreOutcome::Failed;
        };
        let envelope = Envelope::success(value_bytes, self.stamp());
        self.write(key, &envelope).await
    }

    /// Record a failed result with no value. A no-op unless the policy
    /// caches errors.
    pub async fn store_error<E: Display + ?Sized>(&self, key: &StorageKey, err: &E) -> StoreOutcome {
        if !self.policy.caches_errors() {
            return self.skip_error(key);
        }
        let envelope = Envelope::failure(err.to_string(), self.stamp());
        self.write(key, &envelope).await
    }

    /// Record a value together with the error the call returned beside it.
    ///
    /// With `err` set this is a no-op unless the policy caches errors. When
    /// written, the value is kept in the row so that both fresh and stale
    /// lookups can return it.
    pub async fn store_parts<T, E>(
        &self,
        key: &StorageKey,
        value: &T,
        err: Option<&E>,
    ) -> StoreOutcome
    where
        T: Serialize + ?Sized,
        E: Display + ?Sized,
    {
        let Some(err) = err else {
            return self.store_value(key, value).await;
        };
        if !self.policy.caches_errors() {
            return self.skip_error(key);
        }
        let Some(value_bytes) = self.encode_value(key, value) else {
            return StoreOutcome::Failed;
        };
        let envelope =
            Envelope::failure(err.to_string(), self.stamp()).with_value_bytes(value_bytes);
        self.write(key, &envelope).await
    }

    /// Look up `key` and classify what is found.
    ///
    /// # Errors
    ///
    /// - `MemoError::Storage` if the store cannot be read
    /// - `MemoError::Codec` if the row or its value cannot be decoded
    pub async fn load<T: DeserializeOwned>(&self, key: &StorageKey) -> MemoResult<Lookup<T>> {
        let _guard = self.load_lock.lock().await;
        let result = self.load_locked(key).await;
        match &result {
            Ok(lookup) => self.stats.record_lookup(lookup.freshness()),
            Err(e) => {
                tracing::debug!(
                    namespace = self.namespace(),
                    key = %key,
                    backend = self.store.name(),
                    error = %e,
                    "Cache lookup failed"
                );
                self.stats.record_load_error();
            }
        }
        result
    }

    async fn load_locked<T: DeserializeOwned>(&self, key: &StorageKey) -> MemoResult<Lookup<T>> {
        let Some(bytes) = self.store.get_by_key(key).await? else {
            tracing::debug!(namespace = self.namespace(), key = %key, "Cache miss");
            return Ok(Lookup::Miss);
        };

        let envelope = Envelope::decode(&bytes)?;
        let age = envelope.age_at(self.clock.now());
        let state = self.policy.classify(age, envelope.is_error());

        tracing::debug!(
            namespace = self.namespace(),
            key = %key,
            age_ms = age.as_millis() as u64,
            state = ?state,
            "Cache lookup"
        );

        if state == Freshness::Expired {
            return Ok(Lookup::Miss);
        }

        let outcome = self.decode_outcome(envelope)?;
        Ok(match state {
            Freshness::Fresh => Lookup::Fresh(outcome),
            _ => Lookup::Stale(outcome),
        })
    }

    fn decode_outcome<T: DeserializeOwned>(&self, envelope: Envelope) -> MemoResult<Outcome<T>> {
        let Some(error) = envelope.stored_error() else {
            return Ok(Outcome::Value(self.codec.decode(envelope.value_bytes())?));
        };
        // An empty payload means the call failed without a value.
        let value = if envelope.has_value() {
            Some(self.codec.decode(envelope.value_bytes())?)
        } else {
            None
        };
        Ok(Outcome::Error { value, error })
    }

    /// Delete every row. Returns `false` if the store reported a failure.
    pub async fn clear(&self) -> bool {
        match self.store.delete_all().await {
            Ok(removed) => {
                tracing::debug!(namespace = self.namespace(), removed, "Cache cleared");
                true
            }
            Err(e) => {
                tracing::error!(
                    namespace = self.namespace(),
                    backend = self.store.name(),
                    error = %e,
                    "Failed to clear cache"
                );
                false
            }
        }
    }

    /// Delete the row for `key`. Returns `false` if the store reported a
    /// failure; a missing row is not a failure.
    pub async fn remove(&self, key: &StorageKey) -> bool {
        match self.store.delete(key).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    namespace = self.namespace(),
                    key = %key,
                    backend = self.store.name(),
                    error = %e,
                    "Failed to remove cache row"
                );
                false
            }
        }
    }

    /// Destroy the underlying table. Every later operation on the store
    /// fails.
    pub async fn drop_storage(&self) -> MemoResult<()> {
        self.store.drop_storage().await?;
        tracing::info!(
            namespace = self.namespace(),
            backend = self.store.name(),
            "Dropped cache storage"
        );
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    pub fn namespace(&self) -> &str {
        self.keys.namespace()
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub fn key_policy(&self) -> &KeyPolicy {
        self.keys.policy()
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    fn encode_value<T: Serialize + ?Sized>(&self, key: &StorageKey, value: &T) -> Option<Vec<u8>> {
        match self.codec.encode(value) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(
                    namespace = self.namespace(),
                    key = %key,
                    error = %e,
                    "Failed to encode cached value"
                );
                self.stats.record_failed();
                None
            }
        }
    }

    fn skip_error(&self, key: &StorageKey) -> StoreOutcome {
        tracing::trace!(namespace = self.namespace(), key = %key, "Error not cached");
        self.stats.record_skipped();
        StoreOutcome::Skipped
    }

    fn stamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.policy.tracks_age().then(|| self.clock.now())
    }

    async fn write(&self, key: &StorageKey, envelope: &Envelope) -> StoreOutcome {
        match self.store.upsert(key, &envelope.encode()).await {
            Ok(()) => {
                self.stats.record_written();
                StoreOutcome::Written
            }
            Err(e) => {
                tracing::warn!(
                    namespace = self.namespace(),
                    key = %key,
                    backend = self.store.name(),
                    error = %e,
                    "Failed to write cache row"
                );
                self.stats.record_failed();
                StoreOutcome::Failed
            }
        }
    }
}

impl<C: ValueCodec> fmt::Debug for MemoCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCache")
            .field("namespace", &self.namespace())
            .field("backend", &self.store.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`MemoCache`].
///
/// A store is required; everything else has a default.
pub struct MemoCacheBuilder<C: ValueCodec = JsonCodec> {
    key: KeyPolicy,
    policy: FreshnessPolicy,
    store: Option<Arc<dyn KvStore>>,
    clock: Arc<dyn Clock>,
    codec: C,
}

impl MemoCacheBuilder<JsonCodec> {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            key: KeyPolicy::new(namespace),
            policy: FreshnessPolicy::default(),
            store: None,
            clock: Arc::new(SystemClock),
            codec: JsonCodec,
        }
    }
}

impl<C: ValueCodec> MemoCacheBuilder<C> {
    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.policy.ttl = ttl;
        self
    }

    /// `None` disables error caching and judges error rows by `ttl` alone.
    pub fn err_ttl(mut self, err_ttl: Option<Duration>) -> Self {
        self.policy.err_ttl = err_ttl;
        self
    }

    pub fn reuse_ttl(mut self, reuse_ttl: Duration) -> Self {
        self.policy.reuse_ttl = reuse_ttl;
        self
    }

    pub fn max_hash_key_len(mut self, max_hash_key_len: usize) -> Self {
        self.key.max_hash_key_len = max_hash_key_len;
        self
    }

    pub fn policy(mut self, policy: FreshnessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Take namespace, freshness windows and key policy from `settings`.
    ///
    /// `settings.table` belongs to the store; open it with
    /// `SqliteStore::from_settings` or `LmdbStore::from_settings`.
    pub fn settings(mut self, settings: &CacheSettings) -> Self {
        self.key = settings.key.clone();
        self.policy = settings.freshness.clone();
        self
    }

    pub fn clock<K: Clock>(mut self, clock: K) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn codec<C2: ValueCodec>(self, codec: C2) -> MemoCacheBuilder<C2> {
        MemoCacheBuilder {
            key: self.key,
            policy: self.policy,
            store: self.store,
            clock: self.clock,
            codec,
        }
    }

    /// Validate the configuration and build the cache.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingRequired`] if no store was given or the
    ///   namespace is empty
    /// - [`ConfigError::InvalidValue`] if the key or freshness policy is
    ///   inconsistent
    pub fn build(self) -> Result<MemoCache<C>, ConfigError> {
        let store = self.store.ok_or_else(|| ConfigError::MissingRequired {
            field: "store".to_string(),
        })?;
        self.policy.validate()?;
        let keys = KeyCanonicalizer::new(self.key)?;

        if let Some(longest) = keys.policy().longest_key_len() {
            if longest > store.max_key_len() {
                tracing::warn!(
                    namespace = keys.namespace(),
                    backend = store.name(),
                    longest,
                    store_limit = store.max_key_len(),
                    "Hashed keys can exceed the store's key limit; such writes will fail"
                );
            }
        }

        Ok(MemoCache {
            store,
            clock: self.clock,
            keys,
            policy: self.policy,
            codec: self.codec,
            load_lock: Mutex::new(()),
            stats: StatsRecorder::default(),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
