//! Canonical serialization and hashing for snapshots.
//!
//! Snapshot digests must be deterministic across builds, so the byte layout
//! is fixed here and is part of the snapshot format:
//!
//! - objects serialize as `{"k":v,...}` with keys in ascending UTF-8 byte
//!   order and no whitespace;
//! - strings use JSON escaping (`serde_json` string encoding);
//! - numbers use `serde_json`'s shortest-round-trip IEEE-754 formatting;
//! - `null`, `true`, `false` are literal;
//! - digests are lowercase-hex SHA-256 over the UTF-8 bytes of that form.
//!
//! Changing any of this is a breaking change to the snapshot format.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a value in the canonical byte layout described above.
pub fn canonical_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string()),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_string).collect();
            format!("[{}]", rendered.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let rendered: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_else(|_| "\"\"".to_string()),
                        canonical_string(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", rendered.join(","))
        }
    }
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn hash_str(data: &str) -> String {
    hash_bytes(data.as_bytes())
}

pub fn hash_value(value: &Value) -> String {
    hash_str(&canonical_string(value))
}

/// Digest a context field mapping: canonical object form, sorted keys.
pub fn hash_fields(fields: &BTreeMap<String, Value>) -> String {
    let rendered: Vec<String> = fields
        .iter()
        .map(|(k, v)| {
            format!(
                "{}:{}",
                serde_json::to_string(k).unwrap_or_else(|_| "\"\"".to_string()),
                canonical_string(v)
            )
        })
        .collect();
    hash_str(&format!("{{{}}}", rendered.join(",")))
}
