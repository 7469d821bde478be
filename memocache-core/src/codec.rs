//! Pluggable value serialization.
//!
//! The cache never inspects cached values; it only needs a way to turn them
//! into bytes and back. [`ValueCodec`] is that capability.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CodecError;

/// Byte serialization for cached values.
///
/// Implementations must be deterministic enough that `decode(encode(v))`
/// yields a value equal to `v`.
pub trait ValueCodec: Send + Sync + 'static {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON value codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            reason: e.to_string(),
        })
    }
}
