//! Envelope wire format.
//!
//! An [`Envelope`] is what a cache row's value column holds: the serialized
//! result, the error text of a failed call, and when the row was written.
//!
//! # Binary Format
//!
//! ```text
//! [version: u8][flags: u8][created_at: i64 LE micros][error_len: u32 LE][error utf8][value bytes...]
//! ```
//!
//! - flags bit 0: `created_at` is meaningful
//! - flags bit 1: an error was recorded
//!
//! The header is always 14 bytes; everything after the error text is the
//! value payload, so the payload needs no length prefix.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{CodecError, StoredError};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

const FLAG_HAS_TIMESTAMP: u8 = 0b0000_0001;
const FLAG_HAS_ERROR: u8 = 0b0000_0010;
const HEADER_LEN: usize = 1 + 1 + 8 + 4;

/// The durable record of one cached outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    value_bytes: Vec<u8>,
    error_text: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Envelope for a successful call.
    pub fn success(value_bytes: Vec<u8>, created_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value_bytes,
            error_text: None,
            created_at,
        }
    }

    /// Envelope for a failed call with no value payload.
    pub fn failure(error_text: impl Into<String>, created_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value_bytes: Vec::new(),
            error_text: Some(error_text.into()),
            created_at,
        }
    }

    /// Attach a value payload, e.g. the partial result a failed call still
    /// returned.
    pub fn with_value_bytes(mut self, value_bytes: Vec<u8>) -> Self {
        self.value_bytes = value_bytes;
        self
    }

    /// Whether a value payload was recorded.
    pub fn has_value(&self) -> bool {
        !self.value_bytes.is_empty()
    }

    pub fn value_bytes(&self) -> &[u8] {
        &self.value_bytes
    }

    pub fn into_value_bytes(self) -> Vec<u8> {
        self.value_bytes
    }

    pub fn error_text(&self) -> Option<&str> {
        self.error_text.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.error_text.is_some()
    }

    /// The recorded error, rebuilt as an error value.
    pub fn stored_error(&self) -> Option<StoredError> {
        self.error_text.as_deref().map(StoredError::new)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Age of the envelope as of `now`.
    ///
    /// An envelope written without a timestamp is treated as written at the
    /// UNIX epoch, so any active TTL considers it expired. A `created_at` in
    /// the future (clock skew between writers) yields zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        let created_at = self.created_at.unwrap_or(DateTime::UNIX_EPOCH);
        (now - created_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Encode to the versioned binary format.
    ///
    /// Timestamps are stored with microsecond precision.
    pub fn encode(&self) -> Vec<u8> {
        let error = self.error_text.as_deref().unwrap_or_default().as_bytes();
        let mut bytes = Vec::with_capacity(HEADER_LEN + error.len() + self.value_bytes.len());

        let mut flags = 0u8;
        if self.created_at.is_some() {
            flags |= FLAG_HAS_TIMESTAMP;
        }
        if self.error_text.is_some() {
            flags |= FLAG_HAS_ERROR;
        }
        let micros = self.created_at.map_or(0, |t| t.timestamp_micros());

        bytes.push(ENVELOPE_VERSION);
        bytes.push(flags);
        bytes.extend_from_slice(&micros.to_le_bytes());
        bytes.extend_from_slice(&(error.len() as u32).to_le_bytes());
        bytes.extend_from_slice(error);
        bytes.extend_from_slice(&self.value_bytes);
        bytes
    }

    /// Decode from the versioned binary format.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                needed: HEADER_LEN,
                available: bytes.len(),
            });
        }

        let version = bytes[0];
        if version != ENVELOPE_VERSION {
            return Err(CodecError::UnsupportedVersion { found: version });
        }
        let flags = bytes[1];

        let micros_bytes: [u8; 8] = bytes[2..10]
            .try_into()
            .map_err(|_| CodecError::Decode {
                reason: "invalid timestamp".to_string(),
            })?;
        let error_len_bytes: [u8; 4] = bytes[10..14]
            .try_into()
            .map_err(|_| CodecError::Decode {
                reason: "invalid error length".to_string(),
            })?;
        let error_len = u32::from_le_bytes(error_len_bytes) as usize;

        let created_at = if flags & FLAG_HAS_TIMESTAMP != 0 {
            let micros = i64::from_le_bytes(micros_bytes);
            Some(
                DateTime::from_timestamp_micros(micros).ok_or_else(|| CodecError::Decode {
                    reason: format!("timestamp {micros} out of range"),
                })?,
            )
        } else {
            None
        };

        let error_end = HEADER_LEN
            .checked_add(error_len)
            .filter(|end| *end <= bytes.len())
            .ok_or(CodecError::Truncated {
                needed: HEADER_LEN.saturating_add(error_len),
                available: bytes.len(),
            })?;

        let error_text = if flags & FLAG_HAS_ERROR != 0 {
            let text = std::str::from_utf8(&bytes[HEADER_LEN..error_end]).map_err(|e| {
                CodecError::Decode {
                    reason: format!("error text is not UTF-8: {e}"),
                }
            })?;
            Some(text.to_string())
        } else {
            None
        };

        Ok(Self {
            value_bytes: bytes[error_end..].to_vec(),
            error_text,
            created_at,
        })
    }
}
