//! memocache Storage - Stores and the Freshness Engine
//!
//! Defines the [`KvStore`] contract, three implementations of it, and
//! [`MemoCache`], which memoizes call outcomes on top of any store:
//! - [`MemoryStore`]: process-local `HashMap`
//! - [`LmdbStore`]: memory-mapped LMDB file via heed
//! - [`SqliteStore`]: one SQLite table behind an r2d2 pool

pub mod engine;
pub mod lmdb_backend;
pub mod memory;
pub mod sqlite_backend;
pub mod stats;
pub mod store;

pub use engine::{MemoCache, MemoCacheBuilder, StoreOutcome};
pub use lmdb_backend::{LmdbStore, LmdbStoreError, LMDB_MAX_KEY_LEN};
pub use memory::MemoryStore;
pub use sqlite_backend::{SqlitePoolConfig, SqliteStore};
pub use stats::CacheStats;
pub use store::KvStore;

pub use memocache_core::{
    CacheSettings, Clock, Freshness, FreshnessPolicy, Lookup, MemoError, MemoResult, Outcome,
    StorageKey, StoredError,
};
