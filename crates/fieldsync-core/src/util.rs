//! Shared utility functions used across multiple modules.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Check that a collection name is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_collection_name(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render a Unix millisecond timestamp as RFC 3339 (UTC, millisecond precision).
pub fn millis_to_rfc3339(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis).map_or_else(
        || millis.to_string(),
        |datetime| datetime.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

/// Read a timestamp field from a JSON row as Unix milliseconds.
///
/// Accepts RFC 3339 strings and integer milliseconds.
pub fn timestamp_field_millis(row: &Value, field: &str) -> Option<i64> {
    match row.get(field)? {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|datetime| datetime.timestamp_millis()),
        Value::Number(number) => number.as_i64(),
        _ => None,
    }
}

/// Read a row identifier from a JSON object as a string.
///
/// String ids are trimmed; integer ids are rendered in decimal.
pub fn id_field(row: &Value, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(text) => normalize_text_option(Some(text.clone())),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
