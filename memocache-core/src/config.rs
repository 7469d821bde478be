//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::freshness::FreshnessPolicy;
use crate::key::KeyPolicy;

/// Default table holding cache rows.
pub const DEFAULT_TABLE_NAME: &str = "memocache_entries";

/// Everything needed to configure one cache instance, apart from the store.
///
/// Fixed for the lifetime of the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub freshness: FreshnessPolicy,
    pub key: KeyPolicy,
    /// Table (or LMDB database) name used by table-backed stores.
    pub table: String,
}

impl CacheSettings {
    /// Settings for `namespace` with the default policy and table.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            freshness: FreshnessPolicy::default(),
            key: KeyPolicy::new(namespace),
            table: DEFAULT_TABLE_NAME.to_string(),
        }
    }

    pub fn with_freshness(mut self, freshness: FreshnessPolicy) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_max_hash_key_len(mut self, max_hash_key_len: usize) -> Self {
        self.key.max_hash_key_len = max_hash_key_len;
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `MEMOCACHE_TTL_MS`: success TTL in milliseconds (default: 0, never expire)
    /// - `MEMOCACHE_ERR_TTL_MS`: error TTL in milliseconds; negative disables (default: 0)
    /// - `MEMOCACHE_REUSE_TTL_MS`: reuse grace window in milliseconds (default: 0)
    /// - `MEMOCACHE_MAX_HASH_KEY_LEN`: key body length before hashing (default: 0, never hash)
    /// - `MEMOCACHE_TABLE`: table name (default: `memocache_entries`)
    pub fn from_env(namespace: impl Into<String>) -> Self {
        let defaults = Self::new(namespace);

        let ttl = env_millis("MEMOCACHE_TTL_MS").unwrap_or(defaults.freshness.ttl);
        let err_ttl = std::env::var("MEMOCACHE_ERR_TTL_MS")
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(|ms| u64::try_from(ms).ok().map(Duration::from_millis))
            .unwrap_or(defaults.freshness.err_ttl);
        let reuse_ttl =
            env_millis("MEMOCACHE_REUSE_TTL_MS").unwrap_or(defaults.freshness.reuse_ttl);

        Self {
            freshness: FreshnessPolicy {
                ttl,
                err_ttl,
                reuse_ttl,
            },
            key: KeyPolicy {
                max_hash_key_len: std::env::var("MEMOCACHE_MAX_HASH_KEY_LEN")
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(defaults.key.max_hash_key_len),
                ..defaults.key
            },
            table: std::env::var("MEMOCACHE_TABLE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.table),
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(ConfigError) if invalid.
    ///
    /// Validates:
    /// - the key policy (non-empty namespace, reachable key length)
    /// - the freshness windows
    /// - the table name is a plain SQL identifier
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.key.validate()?;
        self.freshness.validate()?;

        if !is_valid_table_name(&self.table) {
            return Err(ConfigError::InvalidValue {
                field: "table".to_string(),
                value: self.table.clone(),
                reason: "table must match [A-Za-z_][A-Za-z0-9_]*".to_string(),
            });
        }

        Ok(())
    }
}

/// Whether `name` can be interpolated into SQL as a bare identifier.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn env_millis(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

// =============================================================================
// TESTS
// =============================================================================
