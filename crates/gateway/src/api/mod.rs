//! HTTP/WS/SSE surface (§6.1): carries the Client Stream Vocabulary and the
//! turn-submission/confirmation/parameter-collection commands over axum,
//! wrapping the transport-agnostic core the same way the teacher's `api`
//! module wraps its `runtime` core.

pub mod auth;
pub mod connections;
pub mod health;
pub mod sessions;
pub mod stream;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::bootstrap::AppState;

/// Builds the full router: an unauthenticated `public` group (just the
/// health probe, the way a load balancer or orchestrator expects it to be
/// reachable with no token) merged with a `protected` group gated behind
/// [`auth::require_api_token`].
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health::health));

    let protected = Router::new()
        .route("/v1/sessions", post(sessions::attach))
        .route("/v1/sessions/:session_id", delete(sessions::detach))
        .route("/v1/sessions/:session_id/stream", get(stream::websocket))
        .route("/v1/sessions/:session_id/sse", get(stream::sse))
        .route("/v1/sessions/:session_id/turns", post(sessions::submit_turn))
        .route("/v1/sessions/:session_id/confirmations", post(sessions::submit_confirmation))
        .route("/v1/sessions/:session_id/parameters", post(sessions::submit_parameters))
        .route("/v1/sessions/:session_id/runs", get(sessions::list_runs))
        .route("/v1/runs/:run_id", get(sessions::get_run))
        .route("/v1/connections", post(connections::connect))
        .route("/v1/connections", delete(connections::disconnect))
        .route("/v1/decisions", get(sessions::list_decisions))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public.merge(protected).layer(tower_http::trace::TraceLayer::new_for_http())
}
