//! Durable key-value store contract.
//!
//! The freshness engine is the only component that talks to a store, and it
//! needs very little from one: keyed upsert, keyed read, and bulk deletion.

use async_trait::async_trait;
use memocache_core::{MemoResult, StorageKey, MAX_STORAGE_KEY_LEN};

/// Durable key-value store for encoded envelopes.
///
/// Implementations must be thread-safe. [`upsert`](KvStore::upsert) in
/// particular must be atomic: concurrent upserts of the same key leave exactly
/// one of the written values, never a mix. The cache takes no lock around
/// writes and relies on this.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend name for logs and errors.
    fn name(&self) -> &str;

    /// Longest key, in bytes, the store can hold.
    fn max_key_len(&self) -> usize {
        MAX_STORAGE_KEY_LEN
    }

    /// Insert or fully replace the row for `key`. Last write wins.
    async fn upsert(&self, key: &StorageKey, value: &[u8]) -> MemoResult<()>;

    /// Read the row for `key`, or `None` if there is none.
    async fn get_by_key(&self, key: &StorageKey) -> MemoResult<Option<Vec<u8>>>;

    /// Delete the row for `key`. Returns whether a row existed.
    async fn delete(&self, key: &StorageKey) -> MemoResult<bool>;

    /// Delete every row. Returns the number of rows removed.
    async fn delete_all(&self) -> MemoResult<u64>;

    /// Destroy the underlying table. The store is unusable afterwards.
    async fn drop_storage(&self) -> MemoResult<()>;
}
