//! LMDB-backed store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cache rows in a
//! memory-mapped key-value file. Each store owns its environment and keeps
//! rows in one named database inside it.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get_by_key`
//! - Write transactions for `upsert`, `delete`, `delete_all` and `drop_storage`
//!
//! LMDB serializes writers, so concurrent upserts of one key leave exactly
//! one of the written values.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use memocache_core::{
    is_valid_table_name, CacheSettings, MemoError, MemoResult, StorageError, StorageKey,
    DEFAULT_TABLE_NAME,
};

use crate::store::KvStore;

const BACKEND: &str = "lmdb";

/// Largest key LMDB accepts with its default page size.
pub const LMDB_MAX_KEY_LEN: usize = 511;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Table name is not a plain identifier.
    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StorageError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::EnvOpen(reason) | LmdbStoreError::DbOpen(reason) => {
                StorageError::Open { reason }
            }
            LmdbStoreError::InvalidTable(name) => StorageError::InvalidTableName { name },
            LmdbStoreError::Io(e) => StorageError::Open {
                reason: e.to_string(),
            },
            LmdbStoreError::Transaction(reason) => StorageError::backend(BACKEND, reason),
        }
    }
}

impl From<LmdbStoreError> for MemoError {
    fn from(e: LmdbStoreError) -> Self {
        MemoError::Storage(e.into())
    }
}

/// LMDB-backed [`KvStore`].
///
/// Keys longer than [`LMDB_MAX_KEY_LEN`] cannot be stored: upserts fail with
/// `StorageError::KeyTooLong` and reads miss. Enable key hashing with a
/// limit that keeps `namespace + body` under that bound when caching through
/// this store.
///
/// # Example
///
/// ```ignore
/// use memocache_storage::LmdbStore;
///
/// let store = LmdbStore::open("/tmp/memocache", 64)?;
/// let cache = MemoCache::builder("getUser").store(Arc::new(store)).build()?;
/// ```
pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    table: String,
    path: PathBuf,
    dropped: AtomicBool,
}

impl LmdbStore {
    /// Open (or create) a store in `path` using the default table name.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        Self::open_table(path, max_size_mb, DEFAULT_TABLE_NAME)
    }

    /// Open (or create) a store in `path` using the table named in
    /// `settings`.
    pub fn from_settings<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        settings: &CacheSettings,
    ) -> Result<Self, LmdbStoreError> {
        Self::open_table(path, max_size_mb, &settings.table)
    }

    /// Open (or create) a store in `path` backed by the named database
    /// `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `table` is not a valid identifier
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open_table<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        table: &str,
    ) -> Result<Self, LmdbStoreError> {
        if !is_valid_table_name(table) {
            return Err(LmdbStoreError::InvalidTable(table.to_string()));
        }

        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(8)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(table))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        tracing::info!(
            backend = BACKEND,
            table = table,
            path = %path.as_ref().display(),
            "Provisioned cache table"
        );

        Ok(Self {
            env,
            db,
            table: table.to_string(),
            path: path.as_ref().to_path_buf(),
            dropped: AtomicBool::new(false),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of rows in the table.
    pub fn len(&self) -> MemoResult<u64> {
        self.check_live()?;
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        let count = self
            .db
            .len(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(count)
    }

    pub fn is_empty(&self) -> MemoResult<bool> {
        Ok(self.len()? == 0)
    }

    fn check_live(&self) -> Result<(), StorageError> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(StorageError::Dropped {
                backend: BACKEND.to_string(),
            });
        }
        Ok(())
    }

    fn check_key(key: &StorageKey) -> Result<(), StorageError> {
        if key.len() > LMDB_MAX_KEY_LEN {
            return Err(StorageError::KeyTooLong {
                len: key.len(),
                max: LMDB_MAX_KEY_LEN,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for LmdbStore {
    fn name(&self) -> &str {
        BACKEND
    }

    fn max_key_len(&self) -> usize {
        LMDB_MAX_KEY_LEN
    }

    async fn upsert(&self, key: &StorageKey, value: &[u8]) -> MemoResult<()> {
        self.check_live()?;
        Self::check_key(key)?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, key.as_bytes(), value)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn get_by_key(&self, key: &StorageKey) -> MemoResult<Option<Vec<u8>>> {
        self.check_live()?;
        // A key LMDB could never have stored is simply absent.
        if key.len() > LMDB_MAX_KEY_LEN {
            return Ok(None);
        }

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let row = self
            .db
            .get(&rtxn, key.as_bytes())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(row.map(<[u8]>::to_vec))
    }

    async fn delete(&self, key: &StorageKey) -> MemoResult<bool> {
        self.check_live()?;
        if key.len() > LMDB_MAX_KEY_LEN {
            return Ok(false);
        }

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    async fn delete_all(&self) -> MemoResult<u64> {
        self.check_live()?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let removed = self
            .db
            .len(&wtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .clear(&mut wtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(removed)
    }

    async fn drop_storage(&self) -> MemoResult<()> {
        if self.dropped.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .clear(&mut wtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.dropped.store(true, Ordering::Release);
        tracing::info!(backend = BACKEND, table = %self.table, "Dropped cache table");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LmdbStore::open(temp_dir.path(), 10).expect("Failed to create store");
        (store, temp_dir)
    }

    fn key(s: &str) -> StorageKey {
        StorageKey::new(s).expect("key should be valid")
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (store, _temp_dir) = create_test_store();

        store
            .upsert(&key("getUser[1]"), b"payload")
            .await
            .expect("upsert should succeed");

        let row = store
            .get_by_key(&key("getUser[1]"))
            .await
            .expect("get should succeed");
        assert_eq!(row.as_deref(), Some(&b"payload"[..]));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let (store, _temp_dir) = create_test_store();
        let row = store
            .get_by_key(&key("absent"))
            .await
            .expect("get should succeed");
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_row() {
        let (store, _temp_dir) = create_test_store();
        let k = key("k");

        store.upsert(&k, b"first").await.expect("upsert should succeed");
        store.upsert(&k, b"second").await.expect("upsert should succeed");

        let row = store.get_by_key(&k).await.expect("get should succeed");
        assert_eq!(row.as_deref(), Some(&b"second"[..]));
        assert_eq!(store.len().expect("len should succeed"), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _temp_dir) = create_test_store();
        let k = key("k");

        store.upsert(&k, b"v").await.expect("upsert should succeed");
        assert!(store.delete(&k).await.expect("delete should succeed"));
        assert!(!store.delete(&k).await.expect("delete should succeed"));
        assert!(store.get_by_key(&k).await.expect("get should succeed").is_none());
    }

    #[tokio::test]
    async fn test_delete_all_counts_rows() {
        let (store, _temp_dir) = create_test_store();
        for i in 0..5 {
            store
                .upsert(&key(&format!("k{i}")), b"v")
                .await
                .expect("upsert should succeed");
        }

        assert_eq!(store.delete_all().await.expect("delete_all should succeed"), 5);
        assert!(store.is_empty().expect("is_empty should succeed"));
        assert_eq!(store.delete_all().await.expect("delete_all should succeed"), 0);
    }

    #[tokio::test]
    async fn test_key_over_lmdb_limit_is_rejected() {
        let (store, _temp_dir) = create_test_store();
        let long = key(&"x".repeat(LMDB_MAX_KEY_LEN + 1));

        let err = store
            .upsert(&long, b"v")
            .await
            .expect_err("oversized key should fail");
        assert_eq!(
            err,
            MemoError::Storage(StorageError::KeyTooLong {
                len: LMDB_MAX_KEY_LEN + 1,
                max: LMDB_MAX_KEY_LEN,
            })
        );
        assert!(store.get_by_key(&long).await.expect("get should succeed").is_none());
        assert_eq!(store.max_key_len(), LMDB_MAX_KEY_LEN);
    }

    #[test]
    fn test_from_settings_uses_configured_table() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let settings = CacheSettings::new("getUser").with_table("user_lookups");
        let store = LmdbStore::from_settings(temp_dir.path(), 10, &settings).expect("open");
        assert_eq!(store.table(), "user_lookups");
    }

    #[test]
    fn test_open_table_records_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LmdbStore::open_table(temp_dir.path(), 10, "user_lookups").expect("open");
        assert_eq!(store.table(), "user_lookups");
        assert_eq!(store.path(), temp_dir.path());
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        {
            let store = LmdbStore::open(temp_dir.path(), 10).expect("open");
            store.upsert(&key("k"), b"durable").await.expect("upsert should succeed");
        }

        let store = LmdbStore::open(temp_dir.path(), 10).expect("reopen");
        let row = store.get_by_key(&key("k")).await.expect("get should succeed");
        assert_eq!(row.as_deref(), Some(&b"durable"[..]));
    }

    #[tokio::test]
    async fn test_drop_storage() {
        let (store, _temp_dir) = create_test_store();
        store.upsert(&key("k"), b"v").await.expect("upsert should succeed");

        store.drop_storage().await.expect("drop should succeed");
        store.drop_storage().await.expect("second drop should be a no-op");

        let err = store
            .upsert(&key("k"), b"v")
            .await
            .expect_err("dropped store should reject writes");
        assert!(matches!(
            err,
            MemoError::Storage(StorageError::Dropped { .. })
        ));
    }

    #[test]
    fn test_invalid_table_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let result = LmdbStore::open_table(temp_dir.path(), 10, "bad-name;");
        assert!(matches!(result, Err(LmdbStoreError::InvalidTable(_))));
    }
}
