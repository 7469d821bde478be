//! memocache Core - Keys, Envelopes and Freshness
//!
//! Pure building blocks shared by every cache backend:
//! - [`KeyCanonicalizer`] maps call arguments to bounded [`StorageKey`]s
//! - [`Envelope`] is the stored value-or-error record and its wire format
//! - [`FreshnessPolicy`] classifies an envelope as fresh, stale or expired
//!
//! Nothing in this crate performs I/O.

pub mod clock;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod freshness;
pub mod key;

pub use clock::{Clock, MockClock, SystemClock};
pub use codec::{JsonCodec, ValueCodec};
pub use config::{is_valid_table_name, CacheSettings, DEFAULT_TABLE_NAME};
pub use envelope::{Envelope, ENVELOPE_VERSION};
pub use error::{CodecError, ConfigError, MemoError, MemoResult, StorageError, StoredError};
pub use freshness::{Freshness, FreshnessPolicy, Lookup, Outcome};
pub use key::{
    ArgEncoder, CallArgs, CanonicalJsonEncoder, HashBucket, KeyCanonicalizer, KeyPolicy,
    StorageKey, MAX_STORAGE_KEY_LEN,
};
