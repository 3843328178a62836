//! Per-field fallback combinators for timestamp documents.
//!
//! Bundles come from old app builds, from the server and from publishers, and
//! they do not always agree on types. Every field is decoded on its own: a field
//! that is missing or malformed falls back to its default instead of failing the
//! whole document. Use with `#[serde(default, deserialize_with = "...")]`.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::models::{sanitize_segments, ChapterTimestamps, TimestampSegment};

/// Decode a field, falling back to `T::default()` when it does not parse.
pub(crate) fn default_on_error<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(from_value_or_default(value))
}

/// Accepts a JSON number or a numeric string. Non-finite values become `0.0`.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_f64(&value).unwrap_or_else(|| {
        debug!(value = %value, "Unparseable number in timestamp document, using 0");
        0.0
    }))
}

pub(crate) fn lenient_usize<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_u64(&value)
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or_else(|| {
            debug!(value = %value, "Unparseable offset in timestamp document, using 0");
            0
        }))
}

pub(crate) fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_u64(&value)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or_else(|| {
            debug!(value = %value, "Unparseable id in timestamp document, using 0");
            0
        }))
}

/// Strings stay strings, numbers and booleans are rendered, anything else is empty.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Decode a list element by element, dropping the elements that fail.
pub(crate) fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(values_to_vec(value))
}

/// Segment list: element-wise decoding followed by sanitization, so lookups can
/// rely on sorted, non-overlapping segments.
pub(crate) fn segments<'de, D>(deserializer: D) -> Result<Vec<TimestampSegment>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(sanitize_segments(values_to_vec(value)))
}

/// Chapter map keyed by chapter number. Keys that are not unsigned integers are
/// skipped.
pub(crate) fn chapters<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<u32, ChapterTimestamps>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Object(entries) = value else {
        warn!("Timestamp bundle chapters is not an object, ignoring");
        return Ok(BTreeMap::new());
    };

    let mut chapters = BTreeMap::new();
    for (key, chapter) in entries {
        let Ok(number) = key.trim().parse::<u32>() else {
            warn!(key = %key, "Skipping timestamp chapter with non-numeric key");
            continue;
        };
        match serde_json::from_value::<ChapterTimestamps>(chapter) {
            Ok(chapter) => {
                chapters.insert(number, chapter);
            }
            Err(e) => warn!(chapter = number, "Skipping undecodable timestamp chapter: {}", e),
        }
    }
    Ok(chapters)
}

fn from_value_or_default<T: DeserializeOwned + Default>(value: Value) -> T {
    if value.is_null() {
        return T::default();
    }
    match serde_json::from_value(value) {
        Ok(decoded) => decoded,
        Err(e) => {
            debug!("Falling back to default for timestamp field: {}", e);
            T::default()
        }
    }
}

fn values_to_vec<T: DeserializeOwned>(value: Value) -> Vec<T> {
    let Value::Array(items) = value else {
        if !value.is_null() {
            debug!("Expected a list in timestamp document, using empty list");
        }
        return Vec::new();
    };

    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if decoded.len() != total {
        debug!(
            dropped = total - decoded.len(),
            total, "Dropped undecodable list elements"
        );
    }
    decoded
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn value_as_u64(value: &Value) -> Option<u64> {
    if let Value::Number(n) = value {
        if let Some(v) = n.as_u64() {
            return Some(v);
        }
    }
    let v = value_as_f64(value)?;
    (v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64).then_some(v as u64)
}
