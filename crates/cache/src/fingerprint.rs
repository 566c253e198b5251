//! Fetch fingerprinting: `MD5(toolName, provider, normalized filters)` (§3).

use md5::{Digest, Md5};
use serde_json::Value;

use ov_domain::cache::Fingerprint;

/// Normalizes `filters` (object key order does not matter) and hashes the
/// triple with MD5, as the spec's data model names explicitly.
pub fn compute_fingerprint(tool_name: &str, provider: &str, filters: &Value) -> Fingerprint {
    let normalized = normalize(filters);
    let mut hasher = Md5::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(provider.as_bytes());
    hasher.update(b"\0");
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Serialize with sorted object keys so semantically identical filter sets
/// produce the same fingerprint regardless of construction order.
fn normalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{k}:{}", normalize(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(normalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_key_order() {
        let a = serde_json::json!({"limit": 3, "query": "from:alice"});
        let b = serde_json::json!({"query": "from:alice", "limit": 3});
        assert_eq!(
            compute_fingerprint("fetch_emails", "gmail", &a),
            compute_fingerprint("fetch_emails", "gmail", &b)
        );
    }

    #[test]
    fn fingerprint_differs_for_different_tools() {
        let filters = serde_json::json!({"limit": 3});
        assert_ne!(
            compute_fingerprint("fetch_emails", "gmail", &filters),
            compute_fingerprint("fetch_events", "gmail", &filters)
        );
    }
}
