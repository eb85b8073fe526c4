//! Content fingerprints for cache keys.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Fingerprint a tool call: SHA-256 (hex) over the tool name and the
/// canonical form of its arguments.
///
/// Argument key order and leading or trailing whitespace in string values
/// do not change the fingerprint.
pub fn fingerprint(tool: &str, args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonicalize(args).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical form of a JSON value: object keys sorted recursively, string
/// values trimmed. Interior whitespace is significant and kept.
///
/// Callers that key a cache on this form must also execute with it, so a
/// hit and a fresh call see the same arguments.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), canonicalize(value)))
                    .collect::<Map<_, _>>(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"path": "src", "recursive": true, "opts": {"x": 1, "y": 2}});
        let b = json!({"opts": {"y": 2, "x": 1}, "recursive": true, "path": "src"});
        assert_eq!(fingerprint("filesystem", &a), fingerprint("filesystem", &b));
    }

    #[test]
    fn incidental_whitespace_does_not_matter() {
        let a = json!({"query": "  hello world\n"});
        let b = json!({"query": "hello world"});
        assert_eq!(fingerprint("search", &a), fingerprint("search", &b));
    }

    #[test]
    fn interior_whitespace_is_significant() {
        assert_ne!(
            fingerprint("filesystem", &json!({"path": "a b.txt"})),
            fingerprint("filesystem", &json!({"path": "a  b.txt"}))
        );
    }

    #[test]
    fn tool_name_is_part_of_the_key() {
        let args = json!({"path": "."});
        assert_ne!(fingerprint("git", &args), fingerprint("filesystem", &args));
    }

    #[test]
    fn different_values_differ() {
        assert_ne!(
            fingerprint("t", &json!({"n": 1})),
            fingerprint("t", &json!({"n": 2}))
        );
        assert_ne!(
            fingerprint("t", &json!({"s": "a b"})),
            fingerprint("t", &json!({"s": "ab"}))
        );
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let key = fingerprint("t", &json!({}));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn canonical_arrays_keep_order() {
        let value = canonicalize(&json!({"items": [" b ", "a"]}));
        assert_eq!(value, json!({"items": ["b", "a"]}));
    }
}
