//! SQLite table store.
//!
//! Rows live in a single table (default `memocache_entries`):
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS memocache_entries (
//!     key   TEXT PRIMARY KEY NOT NULL CHECK(length(key) <= 2048),
//!     value BLOB
//! )
//! ```
//!
//! The table is provisioned when the store is opened. Writes use
//! `INSERT ... ON CONFLICT(key) DO UPDATE`, so a concurrent upsert of the same
//! key replaces the row atomically. Connections come from an r2d2 pool.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use memocache_core::{
    is_valid_table_name, CacheSettings, MemoResult, StorageError, StorageKey,
    DEFAULT_TABLE_NAME, MAX_STORAGE_KEY_LEN,
};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::store::KvStore;

const BACKEND: &str = "sqlite";

/// Pool settings for [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct SqlitePoolConfig {
    pub max_size: u32,
    pub connection_timeout: Duration,
    pub busy_timeout: Duration,
}

impl Default for SqlitePoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            connection_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite-backed [`KvStore`].
#[derive(Debug)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    table: String,
    dropped: AtomicBool,
}

impl SqliteStore {
    /// Open a database file with the default table and pool settings.
    pub fn open<P: AsRef<Path>>(path: P) -> MemoResult<Self> {
        Self::open_with(path, DEFAULT_TABLE_NAME, SqlitePoolConfig::default())
    }

    /// Open a database file, provisioning `table` if it does not exist.
    ///
    /// # Errors
    /// Returns an error if:
    /// - `table` is not a valid identifier
    /// - The pool cannot be built
    /// - The table cannot be created
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        table: &str,
        config: SqlitePoolConfig,
    ) -> MemoResult<Self> {
        let busy_timeout = config.busy_timeout;
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)
        });
        tracing::debug!(path = %path.as_ref().display(), table, "Opening sqlite store");
        Self::from_manager(manager, table, config)
    }

    /// Open a database file using the table named in `settings`.
    pub fn from_settings<P: AsRef<Path>>(
        path: P,
        settings: &CacheSettings,
        config: SqlitePoolConfig,
    ) -> MemoResult<Self> {
        Self::open_with(path, &settings.table, config)
    }

    /// Open a private in-memory database.
    ///
    /// The pool holds a single connection, since every SQLite in-memory
    /// connection is its own database.
    pub fn open_in_memory(table: &str) -> MemoResult<Self> {
        let config = SqlitePoolConfig {
            max_size: 1,
            ..SqlitePoolConfig::default()
        };
        Self::from_manager(SqliteConnectionManager::memory(), table, config)
    }

    fn from_manager(
        manager: SqliteConnectionManager,
        table: &str,
        config: SqlitePoolConfig,
    ) -> MemoResult<Self> {
        if !is_valid_table_name(table) {
            return Err(StorageError::InvalidTableName {
                name: table.to_string(),
            }
            .into());
        }

        let pool = Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .map_err(|e| {
                tracing::warn!(backend = BACKEND, error = %e, "Failed to create connection pool");
                StorageError::Open {
                    reason: e.to_string(),
                }
            })?;

        let store = Self {
            pool,
            table: table.to_string(),
            dropped: AtomicBool::new(false),
        };
        store.provision()?;

        tracing::info!(
            backend = BACKEND,
            table,
            pool_size = config.max_size,
            "Provisioned cache table"
        );
        Ok(store)
    }

    fn provision(&self) -> MemoResult<()> {
        let conn = self.conn()?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                key TEXT PRIMARY KEY NOT NULL CHECK(length(key) <= {}), \
                value BLOB\
            )",
            self.table, MAX_STORAGE_KEY_LEN
        );
        conn.execute(&sql, [])
            .map_err(|e| StorageError::Open {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Number of rows in the table.
    pub fn len(&self) -> MemoResult<u64> {
        self.check_live()?;
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
                row.get(0)
            })
            .map_err(|e| StorageError::backend(BACKEND, e))?;
        Ok(count.max(0) as u64)
    }

    pub fn is_empty(&self) -> MemoResult<bool> {
        Ok(self.len()? == 0)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::backend(BACKEND, e))
    }

    /// Run `f` against a pooled connection on the blocking thread pool.
    ///
    /// Waiting for a pooled connection and SQLite's busy timeout both block,
    /// so neither may run on an async worker.
    async fn run_blocking<R, F>(&self, f: F) -> MemoResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&rusqlite::Connection, &str) -> Result<R, StorageError> + Send + 'static,
    {
        self.check_live()?;
        let pool = self.pool.clone();
        let table = self.table.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| StorageError::backend(BACKEND, e))?;
            f(&conn, &table)
        })
        .await
        .map_err(|e| StorageError::backend(BACKEND, e))?;
        Ok(result?)
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
impl KvStore for SqliteStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn upsert(&self, key: &StorageKey, value: &[u8]) -> MemoResult<()> {
        let (key, value) = (key.as_str().to_string(), value.to_vec());
        self.run_blocking(move |conn, table| {
            let sql = format!(
                "INSERT INTO {table} (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value"
            );
            conn.execute(&sql, params![key, value])
                .map_err(|e| StorageError::backend(BACKEND, e))?;
            Ok(())
        })
        .await
    }

    async fn get_by_key(&self, key: &StorageKey) -> MemoResult<Option<Vec<u8>>> {
        let key = key.as_str().to_string();
        self.run_blocking(move |conn, table| {
            let sql = format!("SELECT value FROM {table} WHERE key = ?1");
            let row: Option<Option<Vec<u8>>> = conn
                .query_row(&sql, params![key], |row| row.get(0))
                .optional()
                .map_err(|e| StorageError::backend(BACKEND, e))?;
            // A NULL value column reads back as an empty row.
            Ok(row.map(Option::unwrap_or_default))
        })
        .await
    }

    async fn delete(&self, key: &StorageKey) -> MemoResult<bool> {
        let key = key.as_str().to_string();
        self.run_blocking(move |conn, table| {
            let changed = conn
                .execute(&format!("DELETE FROM {table} WHERE key = ?1"), params![key])
                .map_err(|e| StorageError::backend(BACKEND, e))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_all(&self) -> MemoResult<u64> {
        self.run_blocking(|conn, table| {
            let changed = conn
                .execute(&format!("DELETE FROM {table}"), [])
                .map_err(|e| StorageError::backend(BACKEND, e))?;
            Ok(changed as u64)
        })
        .await
    }

    async fn drop_storage(&self) -> MemoResult<()> {
        if self.dropped.load(Ordering::Acquire) {
            return Ok(());
        }
        let pool = self.pool.clone();
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let conn = pool.get().map_err(|e| StorageError::backend(BACKEND, e))?;
            conn.execute(&format!("DROP TABLE IF EXISTS {table}"), [])
                .map_err(|e| StorageError::backend(BACKEND, e))?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::backend(BACKEND, e))??;
        self.dropped.store(true, Ordering::Release);
        tracing::info!(backend = BACKEND, table = %self.table, "Dropped cache table");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
