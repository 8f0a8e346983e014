//! `jsonSchema` canonicalization: semantic equality ignores key order.

use serde_json::Value;

/// Rebuild a `Value` with every object's keys in sorted order, recursively.
/// Whitespace is already moot once parsed into a `Value`; key order is the
/// only surviving degree of freedom this needs to normalize away.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub fn schemas_equal(a: &Value, b: &Value) -> bool {
    canonicalize(a) == canonicalize(b)
}
