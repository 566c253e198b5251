//! Provider Gateway (C1, §4.1): the single point of contact between the core
//! and every third-party provider. Adapters register by provider key; warm
//! calls collapse into a no-op within a rolling window. No retry lives here —
//! that is the Orchestrator's job (§4.6).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use ov_domain::cache::WARM_NOOP_WINDOW_SECS;

use crate::adapter::{ProviderAdapter, ProviderError};

pub struct ProviderGateway {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    warm_log: RwLock<HashMap<(String, String), DateTime<Utc>>>,
}

impl ProviderGateway {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            warm_log: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider_key().to_string(), adapter);
    }

    fn resolve(&self, provider_key: &str) -> Result<&Arc<dyn ProviderAdapter>, ProviderError> {
        self.adapters
            .get(provider_key)
            .ok_or_else(|| ProviderError::new(provider_key, "resolve", "no adapter registered for provider"))
    }

    /// Warms the connection unless it was warmed within the last
    /// [`WARM_NOOP_WINDOW_SECS`], in which case this is a silent no-op.
    /// `force` bypasses the window entirely.
    pub async fn warm(&self, provider_key: &str, connection_id: &str, force: bool) -> Result<(), ProviderError> {
        let key = (provider_key.to_string(), connection_id.to_string());
        if !force {
            let last = self.warm_log.read().get(&key).copied();
            if let Some(ts) = last {
                if Utc::now().signed_duration_since(ts).num_seconds() < WARM_NOOP_WINDOW_SECS as i64 {
                    return Ok(());
                }
            }
        }
        let adapter = self.resolve(provider_key)?;
        adapter.warm(connection_id).await?;
        self.warm_log.write().insert(key, Utc::now());
        Ok(())
    }

    pub async fn fetch_from_cache(&self, provider_key: &str, connection_id: &str, action_name: &str, params: &Value) -> Result<Value, ProviderError> {
        let adapter = self.resolve(provider_key)?;
        adapter.fetch_from_cache(connection_id, action_name, params).await
    }

    pub async fn trigger_action(&self, provider_key: &str, connection_id: &str, action_name: &str, params: &Value) -> Result<Value, ProviderError> {
        let adapter = self.resolve(provider_key)?;
        adapter.trigger_action(connection_id, action_name, params).await
    }

    pub async fn trigger_sync(&self, provider_key: &str, connection_id: &str, action_name: &str, params: &Value) -> Result<Value, ProviderError> {
        let adapter = self.resolve(provider_key)?;
        adapter.trigger_sync(connection_id, action_name, params).await
    }
}

impl Default for ProviderGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAdapter {
        key: String,
        warm_calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderAdapter for CountingAdapter {
        fn provider_key(&self) -> &str {
            &self.key
        }

        async fn warm(&self, _connection_id: &str) -> Result<(), ProviderError> {
            self.warm_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn fetch_from_cache(&self, _c: &str, _a: &str, _p: &Value) -> Result<Value, ProviderError> {
            Ok(Value::Null)
        }

        async fn trigger_action(&self, _c: &str, _a: &str, _p: &Value) -> Result<Value, ProviderError> {
            Ok(Value::Null)
        }

        async fn trigger_sync(&self, _c: &str, _a: &str, _p: &Value) -> Result<Value, ProviderError> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn repeated_warm_within_window_is_noop() {
        let adapter = Arc::new(CountingAdapter { key: "gmail".into(), warm_calls: AtomicUsize::new(0) });
        let mut gw = ProviderGateway::new();
        gw.register(adapter.clone());

        gw.warm("gmail", "conn-1", false).await.unwrap();
        gw.warm("gmail", "conn-1", false).await.unwrap();
        assert_eq!(adapter.warm_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_warm_bypasses_window() {
        let adapter = Arc::new(CountingAdapter { key: "gmail".into(), warm_calls: AtomicUsize::new(0) });
        let mut gw = ProviderGateway::new();
        gw.register(adapter.clone());

        gw.warm("gmail", "conn-1", false).await.unwrap();
        gw.warm("gmail", "conn-1", true).await.unwrap();
        assert_eq!(adapter.warm_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_connections_warm_independently() {
        let adapter = Arc::new(CountingAdapter { key: "gmail".into(), warm_calls: AtomicUsize::new(0) });
        let mut gw = ProviderGateway::new();
        gw.register(adapter.clone());

        gw.warm("gmail", "conn-1", false).await.unwrap();
        gw.warm("gmail", "conn-2", false).await.unwrap();
        assert_eq!(adapter.warm_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unregistered_provider_errors() {
        let gw = ProviderGateway::new();
        let err = gw.warm("unknown", "conn-1", false).await.unwrap_err();
        assert_eq!(err.provider_key, "unknown");
    }
}
