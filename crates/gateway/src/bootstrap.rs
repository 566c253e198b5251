//! Process wiring (§6.5): constructs every long-lived subsystem once at
//! startup and hands back one `AppState` the HTTP surface and CLI commands
//! share, modeled on the teacher's `build_app_state`/`spawn_background_tasks`
//! split so a one-shot CLI invocation and `serve` boot the same way.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use ov_cache::EntityCache;
use ov_domain::config::Config;
use ov_providers::adapter::ProviderError;
use ov_providers::http_adapter::{ConnectionTokenResolver, HttpProviderAdapter};
use ov_providers::llm::{HttpLlmClient, LlmClient};
use ov_providers::ProviderGateway;
use ov_sessions::{SessionRegistry, StreamMultiplexer};
use ov_tools::{ToolCatalog, ToolOrchestrator, UserConnections, UserToolFilter};

use crate::cancel::CancelMap;
use crate::confirmation::ConfirmationGate;
use crate::decision::DecisionLog;
use crate::history_store::HistoryStore;
use crate::lifecycle::LifecycleManager;
use crate::persistence::RunStore;
use crate::session_lock::SessionLocks;

const DECISION_LOG_CAPACITY: usize = 500;

/// Resolves a connection's bearer token from `OVERTURE_CONN_TOKEN_<connection_id>`,
/// normalized to the shell-safe uppercase/underscore form an operator would
/// export it under. Swapping this for a real secrets-store lookup is a
/// drop-in replacement — nothing else in the provider path depends on env vars.
pub struct EnvTokenResolver;

#[async_trait]
impl ConnectionTokenResolver for EnvTokenResolver {
    async fn token_for(&self, connection_id: &str) -> Result<String, ProviderError> {
        let var_name = format!("OVERTURE_CONN_TOKEN_{}", connection_id.to_uppercase().replace(['-', ' '], "_"));
        std::env::var(&var_name)
            .map_err(|_| ProviderError::new("unknown", "token_for", format!("no token configured for connection '{connection_id}' (expected env var {var_name})")))
    }
}

/// Every long-lived subsystem the gateway needs, constructed once at boot.
/// Grouped by concern the way the teacher's `AppState` is, each field
/// `Arc`-wrapped so cloning the struct is cheap and handlers/background
/// tasks can hold it independently.
#[derive(Clone)]
pub struct AppState {
    // Configuration
    pub config: Arc<Config>,

    // Core LLM + tools
    pub llm: Arc<dyn LlmClient>,
    pub catalog: Arc<ToolCatalog>,
    pub connections: Arc<UserConnections>,
    pub filter: Arc<UserToolFilter>,
    pub provider_gateway: Arc<ProviderGateway>,
    pub entity_cache: Arc<EntityCache>,
    pub orchestrator: Arc<ToolOrchestrator>,

    // Session management
    pub sessions: Arc<SessionRegistry>,
    pub mux: Arc<StreamMultiplexer>,
    pub session_locks: Arc<SessionLocks>,
    pub cancel_map: Arc<CancelMap>,
    pub lifecycle: Arc<LifecycleManager>,

    // Turn coordination
    pub confirmations: Arc<ConfirmationGate>,
    pub decision_log: Arc<DecisionLog>,
    pub history: Arc<HistoryStore>,

    // Persistence
    pub run_store: Arc<RunStore>,

    // HTTP surface
    /// SHA-256 digest of the configured bearer token, or `None` in dev mode
    /// (no `server.api_token`/`api_token_env` value set) — mirrors the
    /// teacher's `api_token_hash` dev-mode fallback.
    pub api_token_hash: Option<Vec<u8>>,
}

/// Validates `config`, bails on any `ConfigSeverity::Error` issue (warnings
/// are logged and startup proceeds), then constructs every subsystem in
/// dependency order.
pub fn build_app_state(config: Config) -> anyhow::Result<AppState> {
    let issues = config.validate();
    let error_count = issues.iter().filter(|i| i.severity == ov_domain::config::ConfigSeverity::Error).count();
    for issue in &issues {
        match issue.severity {
            ov_domain::config::ConfigSeverity::Error => tracing::error!(message = %issue.message, "configuration error"),
            ov_domain::config::ConfigSeverity::Warning => tracing::warn!(message = %issue.message, "configuration warning"),
        }
    }
    if error_count > 0 {
        anyhow::bail!("refusing to start with {error_count} configuration error(s)");
    }

    let config = Arc::new(config);

    let api_key = std::env::var(&config.llm.api_key_env).unwrap_or_default();
    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(
        config.llm.base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        api_key,
        config.llm.model.clone(),
        Duration::from_secs(config.timeouts.llm_turn_secs),
    )?);
    tracing::info!(model = %config.llm.model, "llm client constructed");

    let catalog = Arc::new(if config.tools_path.exists() {
        ToolCatalog::load(&config.tools_path)?
    } else {
        tracing::warn!(path = %config.tools_path.display(), "tool catalog file missing, starting with an empty catalog");
        ToolCatalog::from_definitions(vec![])
    });
    tracing::info!(tool_count = catalog.len(), "tool catalog loaded");

    let equivalence_groups: Vec<Vec<&str>> = config
        .providers
        .iter()
        .map(|p| {
            let mut group = vec![p.key.as_str()];
            group.extend(p.aliases.iter().map(|a| a.as_str()));
            group
        })
        .collect();
    let connections = Arc::new(UserConnections::with_equivalence_groups(equivalence_groups));

    let filter = Arc::new(UserToolFilter::new(catalog.clone(), connections.clone()));

    let token_resolver: Arc<dyn ConnectionTokenResolver> = Arc::new(EnvTokenResolver);
    let mut provider_gateway = ProviderGateway::new();
    for provider in &config.providers {
        provider_gateway.register(Arc::new(HttpProviderAdapter::new(
            provider.clone(),
            token_resolver.clone(),
            Duration::from_secs(config.timeouts.provider_action_secs),
        )));
    }
    tracing::info!(provider_count = config.providers.len(), "provider gateway constructed");
    let provider_gateway = Arc::new(provider_gateway);

    let entity_cache = Arc::new(EntityCache::new());

    let orchestrator = Arc::new(ToolOrchestrator::new(catalog.clone(), connections.clone(), provider_gateway.clone(), entity_cache.clone()));

    let sessions = Arc::new(SessionRegistry::new());
    let mux = Arc::new(StreamMultiplexer::new());
    let session_locks = Arc::new(SessionLocks::new());
    let cancel_map = Arc::new(CancelMap::new());
    let lifecycle = Arc::new(LifecycleManager::new(config.lifecycle.clone()));

    let confirmations = Arc::new(ConfirmationGate::new());
    let decision_log = Arc::new(DecisionLog::new(DECISION_LOG_CAPACITY));

    let run_store = Arc::new(RunStore::new(config.state.path.join("runs.jsonl")));
    let loaded = run_store.load()?;
    tracing::info!(loaded_runs = loaded, path = %run_store.path().display(), "run store loaded");

    let history = Arc::new(HistoryStore::new());

    let api_token_hash = resolve_api_token_hash(&config);
    if api_token_hash.is_none() {
        tracing::warn!("no API token configured, HTTP surface is running unauthenticated");
    }

    Ok(AppState {
        config,
        llm,
        catalog,
        connections,
        filter,
        provider_gateway,
        entity_cache,
        orchestrator,
        sessions,
        mux,
        session_locks,
        cancel_map,
        lifecycle,
        confirmations,
        decision_log,
        history,
        run_store,
        api_token_hash,
    })
}

/// Reads `config.server.api_token`, falling back to the env var named by
/// `config.server.api_token_env`. Hashed once at startup so the auth
/// middleware only ever compares digests, never raw tokens.
fn resolve_api_token_hash(config: &Config) -> Option<Vec<u8>> {
    let token = config
        .server
        .api_token
        .clone()
        .or_else(|| std::env::var(&config.server.api_token_env).ok())
        .filter(|t| !t.is_empty())?;
    Some(Sha256::digest(token.as_bytes()).to_vec())
}

/// Spawns the periodic maintenance loops `serve` needs running in the
/// background: per-user-tool-filter cache invalidation is event-driven
/// (connections fire it directly) so the only sweep left is session
/// lifecycle resets, modeled on the teacher's bootstrap sweep cadence.
pub fn spawn_background_tasks(state: &AppState) {
    spawn_lifecycle_sweep(state);
    tracing::info!("background tasks spawned");
}

fn spawn_lifecycle_sweep(state: &AppState) {
    let sessions = state.sessions.clone();
    let lifecycle = state.lifecycle.clone();
    let mux = state.mux.clone();
    let cancel_map = state.cancel_map.clone();
    let confirmations = state.confirmations.clone();
    let history = state.history.clone();
    let session_locks = state.session_locks.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let now = chrono::Utc::now();
            for session_id in sessions.all_session_ids() {
                if let Some(session) = sessions.get(&session_id) {
                    if let Some(reason) = lifecycle.should_reset(&session, now) {
                        tracing::info!(session_id = %session.session_id, reason = %reason, "session lifecycle reset");
                        if let Some(run_id) = session.active_run {
                            confirmations.abandon(run_id);
                        }
                        // Flip before clearing (§5): a turn still in flight on this
                        // session observes the signal at its next suspension point
                        // instead of running to completion against a reset session.
                        cancel_map.cancel(&session.session_id);
                        mux.detach(&session.session_id);
                        cancel_map.clear(&session.session_id);
                        sessions.detach(&session.session_id);
                        history.clear(&session.session_id);
                        session_locks.remove(&session.session_id);
                    }
                }
            }
        }
    });
}
