//! Core sample record and its on-disk representation.
//!
//! A [`Sample`] is the single unit of data flowing through the pipeline:
//! either a retrieved value or a retrieval failure, stamped with a UTC
//! timestamp and the id of the source that produced it. Samples are
//! immutable once constructed.
//!
//! Every sample has a deterministic textual key, `<source_id>#<timestamp>`,
//! where the timestamp is RFC 3339 with a fixed nine-digit fractional
//! second in UTC. Because the fractional field is fixed-width, keys for
//! the same source sort byte-wise in timestamp order, which is what the
//! store relies on for range scans.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between source id and timestamp in a sample key.
///
/// Must never appear in a valid source id.
pub const KEY_SEPARATOR: char = '#';

/// Version byte prepended to every encoded sample.
const ENCODING_VERSION: u8 = 1;

/// Errors produced while encoding or decoding a sample.
///
/// Codec failures are never fatal to a batch: callers log them and drop
/// the offending sample.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Sample could not be serialized.
    #[error("failed to encode sample: {0}")]
    Encode(String),

    /// Stored bytes could not be turned back into a sample.
    #[error("failed to decode sample: {0}")]
    Decode(String),
}

/// Build the store key for a `(source_id, timestamp)` pair.
///
/// The timestamp is always rendered in UTC with nanosecond precision so
/// that `a.ts <= b.ts` iff `key(a) <= key(b)` for the same source id.
pub fn sample_key(source_id: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        source_id,
        KEY_SEPARATOR,
        timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    )
}

/// One retrieval outcome from a data source.
///
/// Exactly one of `value` and `err` is meaningful: a sample with an empty
/// value always carries an error description. The `source_id` is never
/// empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    value: String,
    timestamp: DateTime<Utc>,
    source_id: String,
    err: Option<String>,
}

impl Sample {
    /// Create a sample carrying a retrieved value.
    pub fn new(
        value: impl Into<String>,
        timestamp: DateTime<Utc>,
        source_id: impl Into<String>,
    ) -> Self {
        let sample = Self {
            value: value.into(),
            timestamp,
            source_id: source_id.into(),
            err: None,
        };
        debug_assert!(!sample.source_id.is_empty(), "sample requires a source id");
        debug_assert!(!sample.value.is_empty(), "valued sample requires a value");
        sample
    }

    /// Create a sample describing a retrieval or transform failure.
    pub fn failed(
        timestamp: DateTime<Utc>,
        source_id: impl Into<String>,
        err: impl Into<String>,
    ) -> Self {
        let sample = Self {
            value: String::new(),
            timestamp,
            source_id: source_id.into(),
            err: Some(err.into()),
        };
        debug_assert!(!sample.source_id.is_empty(), "sample requires a source id");
        sample
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Error description, when this sample records a failure.
    pub fn err(&self) -> Option<&str> {
        self.err.as_deref()
    }

    /// Store key for this sample, see [`sample_key`].
    pub fn key(&self) -> String {
        sample_key(&self.source_id, self.timestamp)
    }

    /// Serialize to the versioned binary wire form.
    ///
    /// Fails for timestamps outside the nanosecond-representable range.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .ok_or_else(|| CodecError::Encode(format!("timestamp {} out of range", self.timestamp)))?;

        let wire = WireSample {
            value: self.value.clone(),
            timestamp_nanos: nanos,
            source_id: self.source_id.clone(),
            err: self.err.clone().unwrap_or_default(),
        };

        let body = bincode::serialize(&wire).map_err(|e| CodecError::Encode(e.to_string()))?;
        let mut buf = Vec::with_capacity(1 + body.len());
        buf.push(ENCODING_VERSION);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Deserialize from the versioned binary wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (&version, body) = bytes
            .split_first()
            .ok_or_else(|| CodecError::Decode("empty payload".to_string()))?;
        if version != ENCODING_VERSION {
            return Err(CodecError::Decode(format!(
                "unsupported encoding version {version}"
            )));
        }

        let wire: WireSample =
            bincode::deserialize(body).map_err(|e| CodecError::Decode(e.to_string()))?;
        if wire.source_id.is_empty() {
            return Err(CodecError::Decode("sample without source id".to_string()));
        }
        if wire.value.is_empty() && wire.err.is_empty() {
            return Err(CodecError::Decode(
                "sample without value or error".to_string(),
            ));
        }

        Ok(Self {
            value: wire.value,
            timestamp: DateTime::from_timestamp_nanos(wire.timestamp_nanos),
            source_id: wire.source_id,
            err: (!wire.err.is_empty()).then_some(wire.err),
        })
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.err {
            None => write!(f, "[{}] -> {}", self.timestamp.to_rfc2822(), self.value),
            Some(err) => write!(f, "[{}] -> {}", self.timestamp.to_rfc2822(), err),
        }
    }
}

/// Wire layout behind the version byte. An empty `err` decodes to "no
/// error".
#[derive(Serialize, Deserialize)]
struct WireSample {
    value: String,
    timestamp_nanos: i64,
    source_id: String,
    err: String,
}
