//! Provider connection management: the only way a user's connected-provider
//! set (consulted by the User Tool Filter, §4.3) changes at runtime.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use ov_domain::stream::StreamEvent;

use crate::bootstrap::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub user_id: String,
    pub provider_key: String,
    pub connection_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DisconnectRequest {
    pub user_id: String,
    pub provider_key: String,
}

/// `POST /v1/connections`: registers a live connection and pushes a
/// `tools_updated` event to every session the user currently has attached.
pub async fn connect(State(state): State<AppState>, Json(req): Json<ConnectRequest>) -> impl IntoResponse {
    state.connections.connect(&req.user_id, &req.provider_key, req.connection_id);
    state.filter.invalidate_user(&req.user_id);
    broadcast_tools_updated(&state, &req.user_id);
    Json(serde_json::json!({ "connected": true }))
}

/// `DELETE /v1/connections`: removes a connection and invalidates the
/// cached available-tools set the same way.
pub async fn disconnect(State(state): State<AppState>, Json(req): Json<DisconnectRequest>) -> impl IntoResponse {
    state.connections.disconnect(&req.user_id, &req.provider_key);
    state.filter.invalidate_user(&req.user_id);
    broadcast_tools_updated(&state, &req.user_id);
    Json(serde_json::json!({ "connected": false }))
}

fn broadcast_tools_updated(state: &AppState, user_id: &str) {
    let available = state.filter.available_tools_for_user(user_id);
    let names: Vec<&str> = available.iter().map(|t| t.name.as_str()).collect();
    let available_tools = state.catalog.format_for_llm(&names);
    state.mux.broadcast_to_user(&state.sessions, user_id, StreamEvent::ToolsUpdated { available_tools });
}
