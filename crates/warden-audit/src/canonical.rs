//! Canonical JSON serialization and SHA-256 hashing.
//!
//! The hash preimage of every audit event is the **canonical** form of its
//! JSON value: UTF-8, object keys sorted lexicographically by byte value, no
//! insignificant whitespace, numbers in their shortest lossless decimal form,
//! `null` preserved, array order preserved.
//!
//! Two semantically equal payloads therefore hash identically regardless of
//! in-memory field order, and `canonical(canonical(x)) == canonical(x)`.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// The `prev_hash` of the first event in every chain: 64 zeros.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Serialize `value` to canonical JSON bytes.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(value, &mut out);
    out
}

/// Lowercase hex SHA-256 over arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lowercase hex SHA-256 over the canonical form of `value`.
pub fn hash_canonical(value: &Value) -> String {
    sha256_hex(&canonical_bytes(value))
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        // serde_json renders numbers via itoa/ryu: the shortest decimal form
        // that round-trips losslessly.
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_value(&map[key.as_str()], out);
            }
            out.push(b'}');
        }
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    // serde_json's escaping is already minimal and deterministic.
    let escaped = serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""));
    out.extend_from_slice(escaped.as_bytes());
}
