use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Computes a stable fingerprint of a request body: canonical JSON (map keys
/// sorted) hashed with SHA-256 and encoded as Base64. Two structurally equal
/// bodies hash identically regardless of field order on the wire.
pub fn canonical_request_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let raw = serde_json::to_value(value)?;
    let canonical = canonicalize(&raw);
    let bytes = serde_json::to_vec(&canonical)?;
    let digest = Sha256::digest(&bytes);
    Ok(STANDARD.encode(digest))
}

/// Rebuilds a `serde_json::Value` tree with every object represented as a
/// `BTreeMap`, so key order in the serialized output is always lexicographic.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            serde_json::to_value(sorted).expect("canonical map serializes")
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct A {
        b: i32,
        a: i32,
    }

    #[derive(Serialize)]
    struct B {
        a: i32,
        b: i32,
    }

    #[test]
    fn same_content_different_key_order_hashes_equal() {
        let a = A { b: 2, a: 1 };
        let b = B { a: 1, b: 2 };
        assert_eq!(
            canonical_request_hash(&a).unwrap(),
            canonical_request_hash(&b).unwrap()
        );
    }

    #[test]
    fn different_content_hashes_differ() {
        let a = B { a: 1, b: 2 };
        let b = B { a: 1, b: 3 };
        assert_ne!(
            canonical_request_hash(&a).unwrap(),
            canonical_request_hash(&b).unwrap()
        );
    }

    #[test]
    fn nested_object_key_order_is_canonicalized() {
        let v1 = serde_json::json!({"outer": {"z": 1, "a": 2}});
        let v2 = serde_json::json!({"outer": {"a": 2, "z": 1}});
        assert_eq!(
            canonical_request_hash(&v1).unwrap(),
            canonical_request_hash(&v2).unwrap()
        );
    }

    #[test]
    fn hash_is_deterministic_across_calls() {
        let v = serde_json::json!({"customerId": "cust_1", "amount": 500});
        assert_eq!(
            canonical_request_hash(&v).unwrap(),
            canonical_request_hash(&v).unwrap()
        );
    }
}
