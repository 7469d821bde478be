//! Freshness policy and lookup results.
//!
//! Expiry is never persisted. Every lookup re-derives the state of a row from
//! its age and the instance's [`FreshnessPolicy`]:
//!
//! ```text
//!   age <= ttl (or err_ttl)      ttl < age < ttl + reuse_ttl      age >= ttl + reuse_ttl
//! ──────────► Fresh ────────────────────► Stale ─────────────────────────► Expired
//! ```
//!
//! A zero `ttl` disables success expiry. A zero `reuse_ttl` collapses Stale
//! into Expired.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, StoredError};

/// Classification of a stored envelope relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// Within its validity window.
    Fresh,
    /// Past its validity window but inside the reuse grace window. The value
    /// may be served while the caller refreshes it.
    Stale,
    /// Past every window; equivalent to a miss.
    Expired,
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale)
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

/// The three time windows of a cache instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessPolicy {
    /// Validity of successful results. Zero means never expire.
    pub ttl: Duration,
    /// Validity of failed results.
    ///
    /// - `None`: errors are never cached; error rows written under another
    ///   policy are judged by `ttl` alone.
    /// - `Some(Duration::ZERO)`: errors are never cached; any error row found
    ///   is already expired.
    /// - `Some(d)`: errors are cached for `d`.
    pub err_ttl: Option<Duration>,
    /// Grace window after expiry during which the old value is still served.
    pub reuse_ttl: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::ZERO,
            err_ttl: Some(Duration::ZERO),
            reuse_ttl: Duration::ZERO,
        }
    }
}

impl FreshnessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_err_ttl(mut self, err_ttl: Option<Duration>) -> Self {
        self.err_ttl = err_ttl;
        self
    }

    pub fn with_reuse_ttl(mut self, reuse_ttl: Duration) -> Self {
        self.reuse_ttl = reuse_ttl;
        self
    }

    /// Whether failed calls are written to the store at all.
    pub fn caches_errors(&self) -> bool {
        self.err_ttl.is_some_and(|d| !d.is_zero())
    }

    /// Whether envelopes need a creation timestamp for this policy.
    pub fn tracks_age(&self) -> bool {
        !self.ttl.is_zero() || self.err_ttl.is_some()
    }

    /// Whether an envelope of the given age is past its validity window.
    pub fn is_expired(&self, age: Duration, has_error: bool) -> bool {
        let success_expired = !self.ttl.is_zero() && age > self.ttl;
        let error_expired = has_error && self.err_ttl.is_some_and(|err_ttl| age > err_ttl);
        success_expired || error_expired
    }

    /// Classify an envelope of the given age.
    pub fn classify(&self, age: Duration, has_error: bool) -> Freshness {
        if !self.is_expired(age, has_error) {
            return Freshness::Fresh;
        }
        if !self.reuse_ttl.is_zero() && age < self.ttl.saturating_add(self.reuse_ttl) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Validate the policy.
    ///
    /// Validates:
    /// - `ttl + reuse_ttl` does not overflow
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.checked_add(self.reuse_ttl).is_none() {
            return Err(ConfigError::InvalidValue {
                field: "reuse_ttl".to_string(),
                value: format!("{:?}", self.reuse_ttl),
                reason: "ttl + reuse_ttl overflows".to_string(),
            });
        }
        Ok(())
    }
}

/// What a memoized call produced.
///
/// A failed call may still have returned a value alongside its error; that
/// value is kept so a stale hit has something to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Value(T),
    Error {
        value: Option<T>,
        error: StoredError,
    },
}

impl<T> Outcome<T> {
    /// An error outcome with no value.
    pub fn error_only(error: StoredError) -> Self {
        Self::Error { value: None, error }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Error { value, .. } => value.as_ref(),
        }
    }

    pub fn error(&self) -> Option<&StoredError> {
        match self {
            Self::Value(_) => None,
            Self::Error { error, .. } => Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Error { value, .. } => value,
        }
    }

    /// Split into the value and the recorded error.
    pub fn into_pair(self) -> (Option<T>, Option<StoredError>) {
        match self {
            Self::Value(value) => (Some(value), None),
            Self::Error { value, error } => (value, Some(error)),
        }
    }

    /// The error wins over any value recorded with it.
    pub fn into_result(self) -> Result<T, StoredError> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Error { error, .. } => Err(error),
        }
    }
}

/// Result of a cache lookup.
///
/// ```text
/// Fresh  -> has_cache = true,  alive = true
/// Stale  -> has_cache = true,  alive = false
/// Miss   -> has_cache = false, alive = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// Valid entry; serve it.
    Fresh(Outcome<T>),
    /// Expired but reusable; serve it and refresh in the background.
    Stale(Outcome<T>),
    /// Nothing usable; recompute.
    Miss,
}

impl<T> Lookup<T> {
    pub fn has_cache(&self) -> bool {
        !matches!(self, Self::Miss)
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    pub fn freshness(&self) -> Freshness {
        match self {
            Self::Fresh(_) => Freshness::Fresh,
            Self::Stale(_) => Freshness::Stale,
            Self::Miss => Freshness::Expired,
        }
    }

    pub fn outcome(&self) -> Option<&Outcome<T>> {
        match self {
            Self::Fresh(outcome) | Self::Stale(outcome) => Some(outcome),
            Self::Miss => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        self.outcome().and_then(Outcome::value)
    }

    /// Flatten into `(value, has_cache, alive, error)`.
    ///
    /// Only fresh entries surface a stored error. A stale entry reports the
    /// value recorded with it and no error, so the caller serves what it has
    /// and refreshes.
    pub fn into_parts(self) -> (Option<T>, bool, bool, Option<StoredError>) {
        match self {
            Self::Fresh(outcome) => {
                let (value, error) = outcome.into_pair();
                (value, true, true, error)
            }
            Self::Stale(outcome) => (outcome.into_value(), true, false, None),
            Self::Miss => (None, false, false, None),
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        /// Property: for a success row, age alone decides the state:
        /// age <= T is fresh, T < age < T+R is stale, age >= T+R is expired.
        #[test]
        fn prop_three_state_expiry(
            ttl_ms in 1u64..10_000,
            reuse_ms in 1u64..10_000,
            age_ms in 0u64..30_000,
        ) {
            let policy = FreshnessPolicy::new()
                .with_ttl(Duration::from_millis(ttl_ms))
                .with_reuse_ttl(Duration::from_millis(reuse_ms));
            let state = policy.classify(Duration::from_millis(age_ms), false);

            if age_ms <= ttl_ms {
                prop_assert_eq!(state, Freshness::Fresh);
            } else if age_ms < ttl_ms + reuse_ms {
                prop_assert_eq!(state, Freshness::Stale);
            } else {
                prop_assert_eq!(state, Freshness::Expired);
            }
        }

        /// Property: with ttl disabled, success rows are always fresh.
        #[test]
        fn prop_zero_ttl_never_expires_successes(
            reuse_ms in 0u64..10_000,
            age_ms in any::<u32>(),
        ) {
            let policy = FreshnessPolicy::new().with_reuse_ttl(Duration::from_millis(reuse_ms));
            prop_assert_eq!(
                policy.classify(Duration::from_millis(age_ms as u64), false),
                Freshness::Fresh
            );
        }
    }
}
