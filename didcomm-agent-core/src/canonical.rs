//! Deterministic serialization of messages for signing.
//!
//! The canonical form is compact JSON with object keys sorted
//! lexicographically at every depth and the top-level `proof` removed, so
//! signer and verifier agree on the bytes regardless of field order.

use std::fmt::Write;

use serde_json::Value;

/// Field excluded from the signed payload.
pub const PROOF_FIELD: &str = "proof";

/// Canonical JSON text of `value` with any top-level proof stripped.
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    match value {
        Value::Object(map) => write_object(&mut out, map, true),
        other => write_value(&mut out, other),
    }
    out
}

/// UTF-8 bytes of [`canonicalize`].
#[must_use]
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    canonicalize(value).into_bytes()
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => write_object(out, map, false),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn write_object(out: &mut String, map: &serde_json::Map<String, Value>, top_level: bool) {
    let mut keys: Vec<&String> = map
        .keys()
        .filter(|key| !(top_level && key.as_str() == PROOF_FIELD))
        .collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}:", Value::String(key.clone()));
        write_value(out, &map[key.as_str()]);
    }
    out.push('}');
}
