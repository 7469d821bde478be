//! In-memory store.
//!
//! Process-local and volatile. Useful for tests and for embedders that want
//! the freshness semantics without a durable backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use memocache_core::{MemoResult, StorageError, StorageKey};

use crate::store::KvStore;

const BACKEND: &str = "memory";

/// `HashMap`-backed [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<StorageKey, Vec<u8>>>,
    dropped: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes of a row, bypassing the async interface.
    pub fn raw_row(&self, key: &StorageKey) -> Option<Vec<u8>> {
        self.rows.read().ok()?.get(key).cloned()
    }

    /// Overwrite a row directly. Lets tests plant corrupt or foreign rows.
    pub fn put_raw(&self, key: StorageKey, value: Vec<u8>) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert(key, value);
        }
    }

    fn check_live(&self) -> Result<(), StorageError> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(StorageError::Dropped {
                backend: BACKEND.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn upsert(&self, key: &StorageKey, value: &[u8]) -> MemoResult<()> {
        self.check_live()?;
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        rows.insert(key.clone(), value.to_vec());
        Ok(())
    }

    async fn get_by_key(&self, key: &StorageKey) -> MemoResult<Option<Vec<u8>>> {
        self.check_live()?;
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(rows.get(key).cloned())
    }

    async fn delete(&self, key: &StorageKey) -> MemoResult<bool> {
        self.check_live()?;
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(rows.remove(key).is_some())
    }

    async fn delete_all(&self) -> MemoResult<u64> {
        self.check_live()?;
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        let removed = rows.len() as u64;
        rows.clear();
        Ok(removed)
    }

    async fn drop_storage(&self) -> MemoResult<()> {
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        rows.clear();
        self.dropped.store(true, Ordering::Release);
        Ok(())
    }
}
