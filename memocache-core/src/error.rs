//! Error types for memocache operations

use std::fmt;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Backend {backend} failed: {reason}")]
    Backend { backend: String, reason: String },

    #[error("Storage key is {len} bytes, limit is {max}")]
    KeyTooLong { len: usize, max: usize },

    #[error("Failed to open storage: {reason}")]
    Open { reason: String },

    #[error("Invalid table name: {name}")]
    InvalidTableName { name: String },

    #[error("Storage for {backend} has been dropped")]
    Dropped { backend: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Shorthand for a backend failure carrying the driver's message.
    pub fn backend(backend: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Backend {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }
}

/// Encoding and decoding errors for argument keys, values and envelopes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encode failed: {reason}")]
    Encode { reason: String },

    #[error("Decode failed: {reason}")]
    Decode { reason: String },

    #[error("Unsupported envelope version {found}")]
    UnsupportedVersion { found: u8 },

    #[error("Truncated envelope: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all memocache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for memocache operations.
pub type MemoResult<T> = Result<T, MemoError>;

/// The error of a memoized call, reconstructed from its cached text.
///
/// Only the message survives a round trip through the store; the original
/// error type is gone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredError {
    message: String,
}

impl StoredError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for StoredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StoredError {}

// =============================================================================
// TESTS
// =============================================================================
