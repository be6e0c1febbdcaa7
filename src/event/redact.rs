//! # Metadata Redaction
//!
//! Free-form metadata is the one place a producer can leak a credential
//! into the telemetry files, so it is scrubbed when the event is built.
//!
//! Two rules:
//! - a key that looks like it names a secret has its value replaced by
//!   [`REDACTION_MARKER`], whatever the value's type;
//! - nested objects and arrays are replaced by the marker instead of being
//!   serialized, because their contents cannot be checked key by key.

use serde_json::Value;
use std::collections::BTreeMap;

/// Replacement value written in place of anything redacted.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Lowercase fragments that mark a metadata key as secret-like.
const SECRET_KEY_FRAGMENTS: [&str; 6] = [
    "password",
    "token",
    "secret",
    "authorization",
    "cookie",
    "csrf",
];

/// Redacted metadata side channel. Values are JSON scalars or the marker.
pub type Metadata = BTreeMap<String, Value>;

/// Returns true if the key names something that must never be persisted.
///
/// Matching is case-insensitive and by substring, so `api_token`,
/// `X-CSRF-Token` and `Authorization` all match.
pub fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

/// Redact a single metadata value.
pub fn redact_value(key: &str, value: Value) -> Value {
    if is_secret_key(key) {
        return Value::String(REDACTION_MARKER.to_string());
    }
    match value {
        Value::Object(_) | Value::Array(_) => Value::String(REDACTION_MARKER.to_string()),
        scalar => scalar,
    }
}

/// Redact a whole metadata map. Applying it twice changes nothing.
pub fn redact_metadata<I>(entries: I) -> Metadata
where
    I: IntoIterator<Item = (String, Value)>,
{
    entries
        .into_iter()
        .map(|(key, value)| {
            let redacted = redact_value(&key, value);
            (key, redacted)
        })
        .collect()
}
