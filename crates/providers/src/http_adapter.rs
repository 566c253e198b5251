//! Generic REST [`ProviderAdapter`] (§4.1, §6.3). Most providers this engine
//! talks to expose a conventional bearer-token JSON API; rather than hand-write
//! one adapter per vendor, this adapter drives any of them from
//! [`ProviderMetadata`] plus a per-connection token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use ov_domain::config::ProviderMetadata;

use crate::adapter::{ProviderAdapter, ProviderError};

/// Resolves the bearer token to use for a given connection. Connection-to-token
/// mapping is session/user state the engine owns, not something an adapter
/// should cache — implementations typically wrap a session store lookup.
#[async_trait]
pub trait ConnectionTokenResolver: Send + Sync {
    async fn token_for(&self, connection_id: &str) -> Result<String, ProviderError>;
}

pub struct HttpProviderAdapter {
    metadata: ProviderMetadata,
    client: reqwest::Client,
    tokens: Arc<dyn ConnectionTokenResolver>,
}

impl HttpProviderAdapter {
    pub fn new(metadata: ProviderMetadata, tokens: Arc<dyn ConnectionTokenResolver>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { metadata, client, tokens }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.metadata.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn err(&self, action: &str, message: impl Into<String>) -> ProviderError {
        ProviderError::new(self.metadata.key.clone(), action, message)
    }

    async fn post(&self, connection_id: &str, action_name: &str, params: &Value) -> Result<Value, ProviderError> {
        let token = self.tokens.token_for(connection_id).await?;
        let resp = self
            .client
            .post(self.url(action_name))
            .bearer_auth(token)
            .json(params)
            .send()
            .await
            .map_err(|e| self.err(action_name, e.to_string()))?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(self
                .err(action_name, format!("HTTP {}", status.as_u16()))
                .with_status(status.as_u16())
                .with_payload(body));
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderAdapter for HttpProviderAdapter {
    fn provider_key(&self) -> &str {
        &self.metadata.key
    }

    async fn warm(&self, connection_id: &str) -> Result<(), ProviderError> {
        let token = self.tokens.token_for(connection_id).await?;
        let resp = self
            .client
            .get(self.url(&self.metadata.ping_endpoint))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| self.err("warm", e.to_string()))?;
        if !resp.status().is_success() {
            return Err(self.err("warm", format!("HTTP {}", resp.status().as_u16())).with_status(resp.status().as_u16()));
        }
        Ok(())
    }

    async fn fetch_from_cache(&self, connection_id: &str, action_name: &str, params: &Value) -> Result<Value, ProviderError> {
        self.post(connection_id, action_name, params).await
    }

    async fn trigger_action(&self, connection_id: &str, action_name: &str, params: &Value) -> Result<Value, ProviderError> {
        self.post(connection_id, action_name, params).await
    }

    async fn trigger_sync(&self, connection_id: &str, action_name: &str, params: &Value) -> Result<Value, ProviderError> {
        self.post(connection_id, action_name, params).await
    }
}
