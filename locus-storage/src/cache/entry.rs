//! Serialized cache entries.

use locus_core::{LocusResult, StorageError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

/// Decode the raw text of a cache entry.
///
/// A quoted scalar is unwrapped to its inner string; anything else is
/// parsed as structured JSON.
pub fn decode_cache_entry(key: &str, raw: &str) -> LocusResult<JsonValue> {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
    {
        if let Ok(JsonValue::String(unquoted)) = serde_json::from_str::<JsonValue>(trimmed) {
            return Ok(JsonValue::String(unquoted));
        }
        return Ok(JsonValue::String(inner.to_string()));
    }

    serde_json::from_str(trimmed).map_err(|e| {
        StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Decode a cache entry into a typed value.
pub fn decode_cache_value<T: DeserializeOwned>(key: &str, raw: &str) -> LocusResult<T> {
    let value = decode_cache_entry(key, raw)?;
    serde_json::from_value(value).map_err(|e| {
        StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Serialize a value for the JSON store.
pub fn encode_cache_value<T: Serialize>(key: &str, value: &T) -> LocusResult<String> {
    serde_json::to_string(value).map_err(|e| {
        StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
