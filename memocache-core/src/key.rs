//! Key canonicalization.
//!
//! Turns a function namespace plus a tuple of call arguments into a
//! [`StorageKey`]. Canonicalization is pure: the same namespace and equal
//! arguments produce the same key in every process, with no per-process hash
//! seeds involved.
//!
//! # Key Format
//!
//! ```text
//! <namespace><body>
//! ```
//!
//! `body` is the canonical encoding of the arguments. When a maximum length
//! is configured and the body exceeds it, the body is replaced by a hex digest
//! whose width is chosen by the limit:
//!
//! | limit      | digest                    | hex chars |
//! |------------|---------------------------|-----------|
//! | `<= 8`     | FNV-1a 64                 | 16        |
//! | `<= 32`    | BLAKE3, 128-bit output    | 32        |
//! | `<= 64`    | SHA-512/256               | 64        |
//! | otherwise  | SHA-512                   | 128       |

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512, Sha512_256};
use std::fmt;

use crate::error::{CodecError, ConfigError, MemoResult, StorageError};

/// Upper bound on the byte length of any storage key.
pub const MAX_STORAGE_KEY_LEN: usize = 2048;

// ============================================================================
// STORAGE KEY
// ============================================================================

/// The canonical, length-bounded identifier of one cache row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageKey(String);

impl StorageKey {
    /// Wrap an already canonical key, enforcing [`MAX_STORAGE_KEY_LEN`].
    pub fn new(key: impl Into<String>) -> Result<Self, StorageError> {
        let key = key.into();
        if key.len() > MAX_STORAGE_KEY_LEN {
            return Err(StorageError::KeyTooLong {
                len: key.len(),
                max: MAX_STORAGE_KEY_LEN,
            });
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StorageKey {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for StorageKey {
    type Error = StorageError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        key.0
    }
}

// ============================================================================
// HASH BUCKETS
// ============================================================================

/// Digest used to shorten an over-long key body, selected by the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashBucket {
    /// FNV-1a 64-bit, for limits up to 8.
    Fnv1a64,
    /// BLAKE3 truncated to 128 bits, for limits up to 32.
    Blake3x128,
    /// SHA-512/256, for limits up to 64.
    Sha512Trunc256,
    /// Full SHA-512 for anything larger.
    Sha512,
}

impl HashBucket {
    /// Pick the digest for a configured maximum key length.
    pub fn for_limit(limit: usize) -> Self {
        match limit {
            0..=8 => Self::Fnv1a64,
            9..=32 => Self::Blake3x128,
            33..=64 => Self::Sha512Trunc256,
            _ => Self::Sha512,
        }
    }

    /// Length of the hex encoding this bucket produces.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Fnv1a64 => 16,
            Self::Blake3x128 => 32,
            Self::Sha512Trunc256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Hash `raw` and return the lowercase hex digest.
    pub fn digest_hex(self, raw: &[u8]) -> String {
        match self {
            Self::Fnv1a64 => format!("{:016x}", fnv1a64(raw)),
            Self::Blake3x128 => {
                let mut out = [0u8; 16];
                let mut hasher = blake3::Hasher::new();
                hasher.update(raw);
                hasher.finalize_xof().fill(&mut out);
                hex::encode(out)
            }
            Self::Sha512Trunc256 => hex::encode(Sha512_256::digest(raw)),
            Self::Sha512 => hex::encode(Sha512::digest(raw)),
        }
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut h = OFFSET;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}

// ============================================================================
// ARGUMENT ENCODING
// ============================================================================

/// Strategy turning one argument value into its canonical string form.
///
/// Structurally equal values of the same type must always encode to the same
/// string, independent of map insertion order.
pub trait ArgEncoder: Send + Sync {
    fn encode_arg<T: Serialize + ?Sized>(&self, arg: &T) -> Result<String, CodecError>;
}

/// Default encoder: compact JSON with object keys in sorted order.
///
/// Values pass through `serde_json::Value` first, whose map type is ordered,
/// so `HashMap` arguments encode identically regardless of iteration order.
/// Strings stay quoted, which keeps `"1"` and `1` apart.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalJsonEncoder;

impl ArgEncoder for CanonicalJsonEncoder {
    fn encode_arg<T: Serialize + ?Sized>(&self, arg: &T) -> Result<String, CodecError> {
        let value = serde_json::to_value(arg).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })?;
        serde_json::to_string(&value).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })
    }
}

/// An ordered list of call arguments.
///
/// Implemented for `()`, tuples of up to eight `Serialize` values, and slices
/// (for callers assembling arguments dynamically). A single argument encodes
/// as itself; two or more encode as one sequence, so arity and order are part
/// of the key.
pub trait CallArgs {
    fn encode_with<E: ArgEncoder>(&self, encoder: &E) -> Result<String, CodecError>;
}

impl CallArgs for () {
    fn encode_with<E: ArgEncoder>(&self, _encoder: &E) -> Result<String, CodecError> {
        Ok(String::new())
    }
}

impl<A: Serialize> CallArgs for (A,) {
    fn encode_with<E: ArgEncoder>(&self, encoder: &E) -> Result<String, CodecError> {
        encoder.encode_arg(&self.0)
    }
}

macro_rules! impl_call_args_tuple {
    ($($name:ident),+) => {
        impl<$($name: Serialize),+> CallArgs for ($($name,)+) {
            fn encode_with<E: ArgEncoder>(&self, encoder: &E) -> Result<String, CodecError> {
                encoder.encode_arg(self)
            }
        }
    };
}

impl_call_args_tuple!(A, B);
impl_call_args_tuple!(A, B, C);
impl_call_args_tuple!(A, B, C, D);
impl_call_args_tuple!(A, B, C, D, F);
impl_call_args_tuple!(A, B, C, D, F, G);
impl_call_args_tuple!(A, B, C, D, F, G, H);
impl_call_args_tuple!(A, B, C, D, F, G, H, I);

impl<T: Serialize> CallArgs for [T] {
    fn encode_with<E: ArgEncoder>(&self, encoder: &E) -> Result<String, CodecError> {
        match self {
            [] => Ok(String::new()),
            [single] => encoder.encode_arg(single),
            many => encoder.encode_arg(many),
        }
    }
}

// ============================================================================
// KEY POLICY
// ============================================================================

/// Per-function key configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPolicy {
    /// Prefix identifying the memoized function. Must not be empty.
    pub namespace: String,
    /// Body length above which the body is hashed. Zero disables hashing.
    pub max_hash_key_len: usize,
}

impl KeyPolicy {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            max_hash_key_len: 0,
        }
    }

    pub fn with_max_hash_key_len(mut self, max_hash_key_len: usize) -> Self {
        self.max_hash_key_len = max_hash_key_len;
        self
    }

    /// Upper bound on the full key length, or `None` when hashing is off and
    /// keys grow with their arguments.
    pub fn longest_key_len(&self) -> Option<usize> {
        if self.max_hash_key_len == 0 {
            return None;
        }
        let hex_len = HashBucket::for_limit(self.max_hash_key_len).hex_len();
        Some(self.namespace.len() + self.max_hash_key_len.max(hex_len))
    }

    /// Validate the policy.
    ///
    /// Validates:
    /// - namespace is non-empty
    /// - with hashing enabled, the longest possible key fits [`MAX_STORAGE_KEY_LEN`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "namespace".to_string(),
            });
        }

        if self.namespace.len() >= MAX_STORAGE_KEY_LEN {
            return Err(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                value: format!("{} bytes", self.namespace.len()),
                reason: format!("namespace must be shorter than {MAX_STORAGE_KEY_LEN} bytes"),
            });
        }

        if let Some(longest) = self.longest_key_len() {
            if longest > MAX_STORAGE_KEY_LEN {
                return Err(ConfigError::InvalidValue {
                    field: "max_hash_key_len".to_string(),
                    value: self.max_hash_key_len.to_string(),
                    reason: format!(
                        "namespace plus key body can reach {longest} bytes, limit is {MAX_STORAGE_KEY_LEN}"
                    ),
                });
            }
        }

        Ok(())
    }
}

// ============================================================================
// CANONICALIZER
// ============================================================================

/// Maps call arguments to storage keys under one [`KeyPolicy`].
#[derive(Debug, Clone)]
pub struct KeyCanonicalizer<E = CanonicalJsonEncoder> {
    policy: KeyPolicy,
    encoder: E,
}

impl KeyCanonicalizer<CanonicalJsonEncoder> {
    /// Build a canonicalizer with the default JSON argument encoder.
    pub fn new(policy: KeyPolicy) -> Result<Self, ConfigError> {
        Self::with_encoder(policy, CanonicalJsonEncoder)
    }
}

impl<E: ArgEncoder> KeyCanonicalizer<E> {
    pub fn with_encoder(policy: KeyPolicy, encoder: E) -> Result<Self, ConfigError> {
        policy.validate()?;
        Ok(Self { policy, encoder })
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    pub fn namespace(&self) -> &str {
        &self.policy.namespace
    }

    /// Canonicalize `args` into a storage key.
    ///
    /// Fails with a codec error if an argument cannot be encoded, or with
    /// [`StorageError::KeyTooLong`] if hashing is disabled and the key would
    /// exceed [`MAX_STORAGE_KEY_LEN`].
    pub fn canonicalize<A: CallArgs + ?Sized>(&self, args: &A) -> MemoResult<StorageKey> {
        let raw = args.encode_with(&self.encoder)?;
        Ok(self.key_for_raw(&raw)?)
    }

    /// Apply the length policy to an already encoded body and prefix it.
    pub fn key_for_raw(&self, raw: &str) -> Result<StorageKey, StorageError> {
        let body = self.bounded_body(raw);
        let mut key = String::with_capacity(self.policy.namespace.len() + body.len());
        key.push_str(&self.policy.namespace);
        key.push_str(&body);
        StorageKey::new(key)
    }

    /// The key body after the length policy, without the namespace.
    pub fn bounded_body(&self, raw: &str) -> String {
        let limit = self.policy.max_hash_key_len;
        if limit > 0 && raw.len() > limit {
            HashBucket::for_limit(limit).digest_hex(raw.as_bytes())
        } else {
            raw.to_string()
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: equal arguments always canonicalize to the same key.
        #[test]
        fn prop_canonicalize_is_deterministic(
            namespace in "[a-zA-Z][a-zA-Z0-9_]{0,15}",
            a in any::<i64>(),
            b in ".{0,64}",
            c in any::<bool>(),
            limit in 0usize..200,
        ) {
            let policy = KeyPolicy::new(namespace).with_max_hash_key_len(limit);
            let first = KeyCanonicalizer::new(policy.clone()).expect("valid policy");
            let second = KeyCanonicalizer::new(policy).expect("valid policy");

            let k1 = first.canonicalize(&(a, b.clone(), c)).expect("canonicalize");
            let k2 = second.canonicalize(&(a, b, c)).expect("canonicalize");
            prop_assert_eq!(k1, k2);
        }

        /// Property: with a limit set, the body never exceeds the larger of
        /// the limit and the selected digest width.
        #[test]
        fn prop_body_length_is_bounded(
            raw in ".{0,600}",
            limit in 1usize..300,
        ) {
            let keys = KeyCanonicalizer::new(
                KeyPolicy::new("ns").with_max_hash_key_len(limit),
            ).expect("valid policy");
            let body = keys.bounded_body(&raw);
            let hex_len = HashBucket::for_limit(limit).hex_len();
            prop_assert!(body.len() <= limit.max(hex_len));
            if raw.len() > limit {
                prop_assert_eq!(body.len(), hex_len);
            } else {
                prop_assert_eq!(body, raw);
            }
        }
    }
}
