//! Public health probe. Unauthenticated, since orchestrators and load
//! balancers generally can't carry a bearer token.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::bootstrap::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.session_count(),
        "tools": state.catalog.len(),
    }))
}
