use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A cached response for a `(scope, key)` pair, kept alongside the hash it
/// was computed from so a replay with a mismatched hash can still be
/// detected without consulting the idempotency store.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub request_hash: String,
    pub http_status: u16,
    pub response_body: JsonValue,
}

/// An in-process, non-authoritative read-through accelerator for completed
/// idempotent responses. A miss here is never a conflict — it just means the
/// caller must fall back to the idempotency store. Correctness of the system
/// never depends on this cache; it exists purely to shave a DB round trip off
/// hot replays.
pub struct ResponseCache {
    entries: RwLock<HashMap<(String, String), CachedResponse>>,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            enabled,
        }
    }

    pub async fn get(&self, scope: &str, key: &str) -> Option<CachedResponse> {
        if !self.enabled {
            return None;
        }
        self.entries
            .read()
            .await
            .get(&(scope.to_string(), key.to_string()))
            .cloned()
    }

    pub async fn put(&self, scope: &str, key: &str, entry: CachedResponse) {
        if !self.enabled {
            return;
        }
        self.entries
            .write()
            .await
            .insert((scope.to_string(), key.to_string()), entry);
    }
}
