//! Codecs for records crossing the stream boundary
//!
//! The input side speaks the Debezium JSON converter format. With
//! `schemas.enable=true` every key and value is wrapped as
//! `{"schema": {...}, "payload": ...}`; without it the payload is sent
//! bare. [`ChangeCodec`] accepts both. The output side is plain JSON with no
//! schema wrapper ([`JsonCodec`]).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

use crate::error::{CdcError, Result};
use crate::event::{ChangeEnvelope, ChangeRecord, StreamPosition};

/// Handling of the `{schema, payload}` wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaEnvelope {
    /// Unwrap when the document looks like `{schema, payload}`
    #[default]
    Auto,
    /// Every document must be wrapped
    Always,
    /// Documents are never wrapped
    Never,
}

impl SchemaEnvelope {
    /// Strip the wrapper from a decoded document according to the mode
    pub fn unwrap_payload(self, doc: serde_json::Value) -> Result<serde_json::Value> {
        match self {
            Self::Never => Ok(doc),
            Self::Always => match doc {
                serde_json::Value::Object(mut map) if map.contains_key("payload") => {
                    Ok(map.remove("payload").unwrap_or(serde_json::Value::Null))
                }
                _ => Err(CdcError::malformed(
                    "expected a {schema, payload} wrapped document",
                )),
            },
            Self::Auto => match doc {
                serde_json::Value::Object(mut map) if is_wrapped(&map) => {
                    Ok(map.remove("payload").unwrap_or(serde_json::Value::Null))
                }
                other => Ok(other),
            },
        }
    }
}

fn is_wrapped(map: &serde_json::Map<String, serde_json::Value>) -> bool {
    map.contains_key("payload")
        && map.contains_key("schema")
        && map.keys().all(|k| k == "schema" || k == "payload")
}

/// Decoder for keyed Debezium change records
pub struct ChangeCodec<K, V> {
    schema_envelope: SchemaEnvelope,
    _marker: PhantomData<fn() -> (K, V)>,
}

// Manual impls: derives would demand K/V bounds the codec never uses.
impl<K, V> Clone for ChangeCodec<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for ChangeCodec<K, V> {}

impl<K, V> std::fmt::Debug for ChangeCodec<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeCodec")
            .field("schema_envelope", &self.schema_envelope)
            .finish()
    }
}

impl<K, V> Default for ChangeCodec<K, V> {
    fn default() -> Self {
        Self::new(SchemaEnvelope::default())
    }
}

impl<K, V> ChangeCodec<K, V> {
    /// Create a codec with the given wrapper handling
    pub fn new(schema_envelope: SchemaEnvelope) -> Self {
        Self {
            schema_envelope,
            _marker: PhantomData,
        }
    }

    /// Wrapper handling in use
    pub fn schema_envelope(&self) -> SchemaEnvelope {
        self.schema_envelope
    }
}

impl<K, V> ChangeCodec<K, V>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    /// Decode a record key
    pub fn decode_key(&self, bytes: Option<&[u8]>) -> Result<K> {
        let bytes = match bytes {
            Some(b) if !b.is_empty() => b,
            _ => return Err(CdcError::invalid_key("record has no key")),
        };
        let doc: serde_json::Value = serde_json::from_slice(bytes)?;
        let payload = self.schema_envelope.unwrap_payload(doc)?;
        serde_json::from_value(payload).map_err(|e| CdcError::invalid_key(e.to_string()))
    }

    /// Decode a record value; `None` means tombstone
    pub fn decode_value(&self, bytes: Option<&[u8]>) -> Result<Option<ChangeEnvelope<V>>> {
        let bytes = match bytes {
            Some(b) if !b.is_empty() => b,
            _ => return Ok(None),
        };
        let doc: serde_json::Value = serde_json::from_slice(bytes)?;
        let payload = self.schema_envelope.unwrap_payload(doc)?;
        if payload.is_null() {
            return Ok(None);
        }
        let envelope = serde_json::from_value(payload)
            .map_err(|e| CdcError::malformed(format!("undecodable envelope: {e}")))?;
        Ok(Some(envelope))
    }

    /// Decode a full record read at `position`
    pub fn decode(
        &self,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        position: StreamPosition,
    ) -> Result<ChangeRecord<K, V>> {
        Ok(ChangeRecord {
            key: self.decode_key(key)?,
            envelope: self.decode_value(value)?,
            position,
        })
    }
}

/// Plain JSON encoder for output records
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value as compact JSON
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode a plain JSON value
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
