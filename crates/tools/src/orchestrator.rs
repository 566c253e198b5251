//! Tool Orchestrator (C6, §4.6): the single place that turns a resolved
//! [`ToolCall`] into a [`StepResult`] — schema validation, connection
//! resolution, cache-path dedup/fetch/filter, action-path dispatch, retry
//! with backoff, and the LLM-facing body normalization that keeps results
//! small enough to hand back to the model.

use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use ov_cache::{compute_fingerprint, EntityCache};
use ov_domain::cache::{CachedEntity, TRUNCATION_MARKER};
use ov_domain::run::StepResult;
use ov_domain::tool::{ToolCall, ToolSource};
use ov_domain::Error;
use ov_providers::adapter::ProviderError;
use ov_providers::gateway::ProviderGateway;

use crate::catalog::ToolCatalog;
use crate::connections::UserConnections;
use crate::filter_dsl;

const RETRY_MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_MS: u64 = 250;
const RETRY_FACTOR: f64 = 2.0;
const RETRY_JITTER: f64 = 0.25;

/// Caps applied only to the copy of a cached entity returned to the LLM;
/// the cache itself still holds the full (5KiB-capped) `clean_body` (§4.4).
const EMAIL_BODY_LLM_CAP_BYTES: usize = 3 * 1024;
const CRM_TEXT_LLM_CAP_BYTES: usize = 500;
const CRM_TEXT_FIELDS: &[&str] = &["description", "notes"];

pub struct ToolOrchestrator {
    catalog: Arc<ToolCatalog>,
    connections: Arc<UserConnections>,
    gateway: Arc<ProviderGateway>,
    cache: Arc<EntityCache>,
}

impl ToolOrchestrator {
    pub fn new(catalog: Arc<ToolCatalog>, connections: Arc<UserConnections>, gateway: Arc<ProviderGateway>, cache: Arc<EntityCache>) -> Self {
        Self { catalog, connections, gateway, cache }
    }

    /// Executes a single tool call whose arguments have already been
    /// through placeholder resolution. Never panics: every failure mode
    /// becomes a [`StepResult::failure`].
    pub async fn execute(&self, call: &ToolCall) -> StepResult {
        let tool = match self.catalog.get_by_name(&call.name) {
            Some(t) => t,
            None => return StepResult::failure(Error::configuration(format!("unknown tool '{}'", call.name))),
        };

        if let Err(e) = tool.validate(&call.arguments) {
            return StepResult::failure(e);
        }

        let Some(provider_key) = tool.provider_key.as_deref() else {
            return StepResult::failure(Error::configuration(format!("tool '{}' has no provider configured", tool.name)));
        };

        let Some(connection_id) = self.connections.connection_id_for(&call.user_id, provider_key) else {
            return StepResult::failure(Error::auth(format!("no live connection for provider '{provider_key}'")));
        };

        let canonical_provider = self.connections.canonicalize(provider_key).to_string();
        self.ensure_warm(&call.session_id, &canonical_provider, &connection_id).await;

        match tool.source {
            ToolSource::Cache => {
                self.execute_cache_read(call, &tool.name, &canonical_provider, &connection_id, tool.cache_model.as_deref().unwrap_or(&tool.category))
                    .await
            }
            ToolSource::Action => self.execute_action(call, &tool.name, &canonical_provider, &connection_id).await,
        }
    }

    /// Lazily warms `(session, provider, connection)` before the first
    /// dispatch that needs it this session (§3's `WarmupState`, §4.1's
    /// warming policy). A cache hit means a prior step already warmed this
    /// triple recently, so this is a no-op on the hot path. Warming failure
    /// is logged and never fails the call it precedes (§4.1: "failure is
    /// logged... does not propagate").
    async fn ensure_warm(&self, session_id: &str, provider_key: &str, connection_id: &str) {
        if self.cache.is_warm(session_id, provider_key, connection_id) {
            return;
        }
        match self.gateway.warm(provider_key, connection_id, false).await {
            Ok(()) => self.cache.record_warmup(session_id, provider_key, connection_id, true),
            Err(e) => {
                tracing::warn!(provider = %provider_key, connection = %connection_id, error = %e.message, "connection warm failed");
                self.cache.record_warmup(session_id, provider_key, connection_id, false);
            }
        }
    }

    async fn execute_cache_read(
        &self,
        call: &ToolCall,
        tool_name: &str,
        provider_key: &str,
        connection_id: &str,
        entity_type: &str,
    ) -> StepResult {
        let fingerprint = compute_fingerprint(tool_name, provider_key, &call.arguments);

        let entity_ids = match self.cache.check_fetch_dedup(&call.session_id, &fingerprint) {
            Some(ids) => ids,
            None => {
                let fetch = retry_with_backoff(|| self.gateway.fetch_from_cache(provider_key, connection_id, tool_name, &call.arguments)).await;
                let payload = match fetch {
                    Ok(v) => v,
                    Err(e) => return StepResult::failure(e.into()),
                };

                let ids: Vec<String> = parse_raw_entities(&payload)
                    .into_iter()
                    .map(|(id, raw_body, metadata)| {
                        let entity = self.cache.cache_raw_entity(&call.session_id, &id, entity_type, provider_key, &raw_body, metadata);
                        entity.id
                    })
                    .collect();
                self.cache.record_fetch_result(&call.session_id, fingerprint, ids.clone());
                ids
            }
        };

        let entities = self.cache.get_entities(&call.session_id, &entity_ids);
        let rows: Vec<Value> = entities.iter().map(entity_to_row).collect();
        let filtered = filter_dsl::apply(rows, &call.arguments);
        let normalized: Vec<Value> = filtered.iter().map(|row| normalize_for_llm(row, entity_type)).collect();

        StepResult::success(serde_json::json!({ "data": normalized }))
    }

    async fn execute_action(&self, call: &ToolCall, tool_name: &str, provider_key: &str, connection_id: &str) -> StepResult {
        let result = retry_with_backoff(|| self.gateway.trigger_action(provider_key, connection_id, tool_name, &call.arguments)).await;
        match result {
            Ok(data) => StepResult::success(normalize_for_llm(&data, tool_name)),
            Err(e) => StepResult::failure(e.into()),
        }
    }
}

/// Exponential backoff, base 250ms, factor 2.0, ±25% jitter, max 3 attempts.
/// Only retries `ProviderError`s the adapter marked retryable (§4.6: 5xx and
/// transport failures only, never 4xx/validation).
async fn retry_with_backoff<F, Fut, T>(mut attempt: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut last_err = None;
    for attempt_no in 0..RETRY_MAX_ATTEMPTS {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let is_last = attempt_no + 1 == RETRY_MAX_ATTEMPTS;
                if !err.is_retryable() || is_last {
                    return Err(err);
                }
                let delay_ms = backoff_delay_ms(attempt_no);
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                last_err = Some(err);
            }
        }
    }
    Err(last_err.expect("loop always runs at least once"))
}

fn backoff_delay_ms(attempt_no: u32) -> u64 {
    let base = RETRY_BASE_MS as f64 * RETRY_FACTOR.powi(attempt_no as i32);
    (base * jitter_factor()).round() as u64
}

/// Pseudo-random jitter in `[1 - RETRY_JITTER, 1 + RETRY_JITTER]`, derived
/// from the clock rather than a dependency: no `rand` crate in this stack.
fn jitter_factor() -> f64 {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.subsec_nanos()).unwrap_or(0);
    let unit = (nanos % 1_000_000) as f64 / 1_000_000.0;
    1.0 - RETRY_JITTER + unit * (2.0 * RETRY_JITTER)
}

fn parse_raw_entities(payload: &Value) -> Vec<(String, String, Value)> {
    let Value::Array(items) = payload else { return Vec::new() };
    items
        .iter()
        .filter_map(|item| {
            let id = item.get("id")?.as_str()?.to_string();
            let raw_body = item
                .get("body")
                .and_then(|b| b.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| item.to_string());
            Some((id, raw_body, item.clone()))
        })
        .collect()
}

fn entity_to_row(entity: &CachedEntity) -> Value {
    let mut obj = match &entity.metadata {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    obj.insert("id".into(), Value::String(entity.id.clone()));
    obj.insert("body".into(), Value::String(entity.clean_body.clone()));
    obj.insert("provider".into(), Value::String(entity.provider.clone()));
    obj.insert("timestamp".into(), Value::String(entity.timestamp.to_rfc3339()));
    Value::Object(obj)
}

/// Trims long text fields before a cache row (or action result) is handed to
/// the LLM: email bodies to 3KiB, CRM free-text fields to ~500 chars. This is
/// separate from the 5KiB cap already applied at cache-insert time.
fn normalize_for_llm(row: &Value, category_or_type: &str) -> Value {
    let Value::Object(map) = row else { return row.clone() };
    let mut out = map.clone();

    if category_or_type.eq_ignore_ascii_case("email") {
        if let Some(Value::String(body)) = out.get("body").cloned() {
            out.insert("body".into(), Value::String(truncate(&body, EMAIL_BODY_LLM_CAP_BYTES)));
        }
    }

    if category_or_type.eq_ignore_ascii_case("crm") {
        for field in CRM_TEXT_FIELDS {
            if let Some(Value::String(text)) = out.get(*field).cloned() {
                out.insert((*field).to_string(), Value::String(truncate(&text, CRM_TEXT_LLM_CAP_BYTES)));
            }
        }
    }

    Value::Object(out)
}

fn truncate(s: &str, cap_bytes: usize) -> String {
    if s.len() <= cap_bytes {
        return s.to_string();
    }
    let mut end = cap_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATION_MARKER}", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use ov_domain::tool::{ParameterSchema, ToolDefinition};
    use ov_providers::adapter::ProviderAdapter;

    struct FakeAdapter {
        key: String,
        fetch_calls: AtomicUsize,
        fail_first_n: usize,
        cache_payload: Value,
        warm_calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        fn provider_key(&self) -> &str {
            &self.key
        }

        async fn warm(&self, _connection_id: &str) -> Result<(), ProviderError> {
            self.warm_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn fetch_from_cache(&self, _connection_id: &str, _action_name: &str, _params: &Value) -> Result<Value, ProviderError> {
            let call_no = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if call_no < self.fail_first_n {
                return Err(ProviderError::new(&self.key, "fetch_from_cache", "temporary outage").with_status(503));
            }
            Ok(self.cache_payload.clone())
        }

        async fn trigger_action(&self, _connection_id: &str, _action_name: &str, params: &Value) -> Result<Value, ProviderError> {
            Ok(serde_json::json!({"sent": true, "to": params["to"]}))
        }

        async fn trigger_sync(&self, _connection_id: &str, _action_name: &str, _params: &Value) -> Result<Value, ProviderError> {
            Ok(Value::Null)
        }
    }

    fn email_tool() -> ToolDefinition {
        ToolDefinition {
            name: "fetch_emails".into(),
            category: "email".into(),
            display_name: "Fetch Emails".into(),
            provider_key: Some("gmail".into()),
            source: ToolSource::Cache,
            cache_model: Some("email".into()),
            parameter_schema: ParameterSchema::object(vec![], Default::default()),
            description: "d".into(),
        }
    }

    fn send_email_tool() -> ToolDefinition {
        ToolDefinition {
            name: "send_email".into(),
            category: "email".into(),
            display_name: "Send Email".into(),
            provider_key: Some("gmail".into()),
            source: ToolSource::Action,
            cache_model: None,
            parameter_schema: ParameterSchema::object(vec!["to"], {
                let mut m = std::collections::HashMap::new();
                m.insert("to".into(), ParameterSchema::string());
                m
            }),
            description: "d".into(),
        }
    }

    fn tool_call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "call_1".into(), name: name.into(), arguments: args, session_id: "s1".into(), user_id: "u1".into() }
    }

    fn orchestrator_with(adapter: Arc<FakeAdapter>, tools: Vec<ToolDefinition>) -> ToolOrchestrator {
        let catalog = ToolCatalog::from_definitions(tools);
        let connections = UserConnections::new();
        connections.connect("u1", "gmail", "conn-1");
        let mut gateway = ProviderGateway::new();
        gateway.register(adapter);
        ToolOrchestrator::new(Arc::new(catalog), Arc::new(connections), Arc::new(gateway), Arc::new(EntityCache::new()))
    }

    #[tokio::test]
    async fn unknown_tool_is_configuration_error() {
        let adapter = Arc::new(FakeAdapter { key: "gmail".into(), fetch_calls: AtomicUsize::new(0), fail_first_n: 0, cache_payload: Value::Null, warm_calls: AtomicUsize::new(0) });
        let orch = orchestrator_with(adapter, vec![]);
        let result = orch.execute(&tool_call("ghost", serde_json::json!({}))).await;
        assert!(!result.is_success());
        assert_eq!(result.error.unwrap().kind, ov_domain::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn missing_connection_is_auth_error() {
        let adapter = Arc::new(FakeAdapter { key: "gmail".into(), fetch_calls: AtomicUsize::new(0), fail_first_n: 0, cache_payload: Value::Null, warm_calls: AtomicUsize::new(0) });
        let catalog = ToolCatalog::from_definitions(vec![email_tool()]);
        let mut gateway = ProviderGateway::new();
        gateway.register(adapter);
        let orch = ToolOrchestrator::new(Arc::new(catalog), Arc::new(UserConnections::new()), Arc::new(gateway), Arc::new(EntityCache::new()));
        let result = orch.execute(&tool_call("fetch_emails", serde_json::json!({}))).await;
        assert_eq!(result.error.unwrap().kind, ov_domain::ErrorKind::Auth);
    }

    #[tokio::test]
    async fn cache_fetch_caps_email_body_for_llm() {
        let long_body = "x".repeat(EMAIL_BODY_LLM_CAP_BYTES + 500);
        let payload = serde_json::json!([{"id": "e1", "body": long_body, "subject": "hi"}]);
        let adapter = Arc::new(FakeAdapter { key: "gmail".into(), fetch_calls: AtomicUsize::new(0), fail_first_n: 0, cache_payload: payload, warm_calls: AtomicUsize::new(0) });
        let orch = orchestrator_with(adapter, vec![email_tool()]);

        let result = orch.execute(&tool_call("fetch_emails", serde_json::json!({}))).await;
        assert!(result.is_success());
        let data = result.data.unwrap();
        let body = data["data"][0]["body"].as_str().unwrap();
        assert!(body.len() < EMAIL_BODY_LLM_CAP_BYTES + TRUNCATION_MARKER.len() + 1);
        assert!(body.ends_with(TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn repeated_fetch_within_fingerprint_ttl_is_deduped() {
        let payload = serde_json::json!([{"id": "e1", "body": "hi"}]);
        let adapter = Arc::new(FakeAdapter { key: "gmail".into(), fetch_calls: AtomicUsize::new(0), fail_first_n: 0, cache_payload: payload, warm_calls: AtomicUsize::new(0) });
        let orch = orchestrator_with(adapter.clone(), vec![email_tool()]);

        orch.execute(&tool_call("fetch_emails", serde_json::json!({"query": "x"}))).await;
        orch.execute(&tool_call("fetch_emails", serde_json::json!({"query": "x"}))).await;
        assert_eq!(adapter.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_and_recovers() {
        let payload = serde_json::json!([{"id": "e1", "body": "hi"}]);
        let adapter = Arc::new(FakeAdapter { key: "gmail".into(), fetch_calls: AtomicUsize::new(0), fail_first_n: 2, cache_payload: payload, warm_calls: AtomicUsize::new(0) });
        let orch = orchestrator_with(adapter.clone(), vec![email_tool()]);

        let result = orch.execute(&tool_call("fetch_emails", serde_json::json!({}))).await;
        assert!(result.is_success());
        assert_eq!(adapter.fetch_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_exhausted_surfaces_as_transport_not_provider() {
        let payload = serde_json::json!([{"id": "e1", "body": "hi"}]);
        let adapter = Arc::new(FakeAdapter { key: "gmail".into(), fetch_calls: AtomicUsize::new(0), fail_first_n: 3, cache_payload: payload, warm_calls: AtomicUsize::new(0) });
        let orch = orchestrator_with(adapter.clone(), vec![email_tool()]);

        let result = orch.execute(&tool_call("fetch_emails", serde_json::json!({}))).await;
        assert!(!result.is_success());
        assert_eq!(result.error.unwrap().kind, ov_domain::ErrorKind::Transport);
        assert_eq!(adapter.fetch_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn action_tool_dispatches_and_returns_result() {
        let adapter = Arc::new(FakeAdapter { key: "gmail".into(), fetch_calls: AtomicUsize::new(0), fail_first_n: 0, cache_payload: Value::Null, warm_calls: AtomicUsize::new(0) });
        let orch = orchestrator_with(adapter, vec![send_email_tool()]);

        let result = orch.execute(&tool_call("send_email", serde_json::json!({"to": "alice@x.com"}))).await;
        assert!(result.is_success());
        assert_eq!(result.data.unwrap()["to"], serde_json::json!("alice@x.com"));
    }

    #[tokio::test]
    async fn schema_validation_failure_short_circuits_before_dispatch() {
        let adapter = Arc::new(FakeAdapter { key: "gmail".into(), fetch_calls: AtomicUsize::new(0), fail_first_n: 0, cache_payload: Value::Null, warm_calls: AtomicUsize::new(0) });
        let orch = orchestrator_with(adapter, vec![send_email_tool()]);

        let result = orch.execute(&tool_call("send_email", serde_json::json!({}))).await;
        assert_eq!(result.error.unwrap().kind, ov_domain::ErrorKind::Schema);
    }

    #[tokio::test]
    async fn second_call_within_warmup_window_does_not_warm_again() {
        let payload = serde_json::json!([{"id": "e1", "body": "hi"}]);
        let adapter = Arc::new(FakeAdapter { key: "gmail".into(), fetch_calls: AtomicUsize::new(0), fail_first_n: 0, cache_payload: payload, warm_calls: AtomicUsize::new(0) });
        let orch = orchestrator_with(adapter.clone(), vec![email_tool()]);

        orch.execute(&tool_call("fetch_emails", serde_json::json!({"query": "a"}))).await;
        orch.execute(&tool_call("fetch_emails", serde_json::json!({"query": "b"}))).await;

        assert_eq!(adapter.warm_calls.load(Ordering::SeqCst), 1);
    }
}
