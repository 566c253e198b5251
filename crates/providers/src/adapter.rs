//! Provider Adapter Contract (§4.1, §6.3): the one seam between the core and
//! a concrete third-party API. An adapter never retries internally — that
//! policy lives one layer up, in the Orchestrator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable key identifying which provider this adapter speaks for, e.g. `"gmail"`.
    fn provider_key(&self) -> &str;

    /// Cheap liveness probe. No side effects beyond confirming the connection works.
    async fn warm(&self, connection_id: &str) -> Result<(), ProviderError>;

    /// Fetch entities for caching (C4). `params` is the tool's resolved arguments.
    async fn fetch_from_cache(&self, connection_id: &str, action_name: &str, params: &Value) -> Result<Value, ProviderError>;

    /// Perform a write/mutating action against the provider.
    async fn trigger_action(&self, connection_id: &str, action_name: &str, params: &Value) -> Result<Value, ProviderError>;

    /// Perform a synchronous action expected to return a result usable immediately
    /// (as opposed to `trigger_action`, which may fire-and-forget).
    async fn trigger_sync(&self, connection_id: &str, action_name: &str, params: &Value) -> Result<Value, ProviderError>;
}

/// A structured failure from a provider call, shaped for direct inclusion in
/// a `tool_result` error payload (§6.1).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderError {
    pub provider_key: String,
    pub action_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_payload: Option<Value>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProviderError {
    pub fn new(provider_key: impl Into<String>, action_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider_key: provider_key.into(),
            action_name: action_name.into(),
            status_code: None,
            provider_payload: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.provider_payload = Some(payload);
        self
    }

    /// Whether a caller may retry this failure (transport/5xx only, per §4.6's
    /// backoff policy — 4xx/validation failures are not retryable).
    pub fn is_retryable(&self) -> bool {
        match self.status_code {
            Some(code) => code >= 500,
            None => true,
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}: {}", self.provider_key, self.action_name, self.message)
    }
}

impl From<ProviderError> for ov_domain::Error {
    /// §7: a connection-level failure or a 5xx that survived the
    /// Orchestrator's retry/backoff policy is `transport`, not `provider` —
    /// only a provider response carrying a 4xx status is `provider`.
    fn from(e: ProviderError) -> Self {
        let details = serde_json::json!({
            "providerKey": e.provider_key,
            "actionName": e.action_name,
            "statusCode": e.status_code,
            "providerPayload": e.provider_payload,
            "timestamp": e.timestamp,
        });
        let kind = match e.status_code {
            Some(code) if code < 500 => ov_domain::ErrorKind::Provider,
            _ => ov_domain::ErrorKind::Transport,
        };
        ov_domain::Error::new(kind, e.message).with_details(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ov_domain::ErrorKind;

    #[test]
    fn four_xx_maps_to_provider() {
        let e = ProviderError::new("gmail", "send", "bad request").with_status(400);
        let err: ov_domain::Error = e.into();
        assert_eq!(err.kind, ErrorKind::Provider);
    }

    #[test]
    fn five_xx_maps_to_transport() {
        let e = ProviderError::new("gmail", "send", "service unavailable").with_status(503);
        let err: ov_domain::Error = e.into();
        assert_eq!(err.kind, ErrorKind::Transport);
    }

    #[test]
    fn connection_level_failure_with_no_status_maps_to_transport() {
        let e = ProviderError::new("gmail", "send", "connection reset");
        let err: ov_domain::Error = e.into();
        assert_eq!(err.kind, ErrorKind::Transport);
    }
}
