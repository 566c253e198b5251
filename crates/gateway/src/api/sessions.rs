//! Session lifecycle and turn-submission endpoints: attach/detach, the turn
//! request/response cycle, and the confirmation/parameter-collection replies
//! that resume a suspended run.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use ov_domain::session::ANONYMOUS_USER;
use ov_domain::stream::StreamEvent;

use crate::bootstrap::AppState;
use crate::coordinator::{self, CoordinatorDeps};

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn deps_for(state: &AppState, session_id: &str) -> CoordinatorDeps {
    CoordinatorDeps {
        llm: state.llm.clone(),
        catalog: state.catalog.clone(),
        filter: state.filter.clone(),
        orchestrator: state.orchestrator.clone(),
        mux: state.mux.clone(),
        confirmations: state.confirmations.clone(),
        decision_log: state.decision_log.clone(),
        cancel: state.cancel_map.get(session_id).unwrap_or_default(),
    }
}

#[derive(Debug, Deserialize)]
pub struct AttachRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// `POST /v1/sessions`: registers a session in the registry. The client
/// still has to open `/stream` or `/sse` to actually receive events (§3:
/// attach is cheap and idempotent, the sink is a separate step).
pub async fn attach(State(state): State<AppState>, Json(req): Json<AttachRequest>) -> impl IntoResponse {
    let session_id = req.session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let user_id = req.user_id.unwrap_or_else(|| ANONYMOUS_USER.to_string());
    let session = state.sessions.attach(session_id, user_id);
    state.cancel_map.register(&session.session_id);
    Json(serde_json::json!({ "session_id": session.session_id, "user_id": session.user_id }))
}

/// `DELETE /v1/sessions/:session_id`: tears down every piece of per-session
/// state — registry entry, stream sink, cancellation signal, and the
/// in-memory conversation history. Flips the cancellation signal before
/// clearing it (§5: "client detach cancels the signal") so a turn in flight
/// on this session observes it at its next suspension point, and abandons
/// any confirmation the session's active run is suspended on.
pub async fn detach(State(state): State<AppState>, Path(session_id): Path<String>) -> impl IntoResponse {
    if let Some(session) = state.sessions.get(&session_id) {
        if let Some(run_id) = session.active_run {
            state.confirmations.abandon(run_id);
        }
    }
    state.cancel_map.cancel(&session_id);
    state.sessions.detach(&session_id);
    state.mux.detach(&session_id);
    state.cancel_map.clear(&session_id);
    state.history.clear(&session_id);
    state.session_locks.remove(&session_id);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub user_input: String,
}

/// `POST /v1/sessions/:session_id/turns`: runs one user turn to completion
/// (or suspension) via the Conversation Coordinator. Rejects a second
/// concurrent turn on the same session (§5) with `409 Conflict`.
pub async fn submit_turn(State(state): State<AppState>, Path(session_id): Path<String>, Json(req): Json<TurnRequest>) -> Response {
    let Some(session) = state.sessions.get(&session_id) else {
        return api_error(StatusCode::NOT_FOUND, "unknown session");
    };

    let Some(_guard) = state.session_locks.try_acquire(&session_id) else {
        return api_error(StatusCode::CONFLICT, "a turn is already in flight on this session");
    };

    let deps = deps_for(&state, &session_id);
    let mut history = state.history.take(&session_id);

    let result = coordinator::handle_turn(&deps, &mut history, &session_id, &session.user_id, &req.user_input).await;

    state.history.put(&session_id, history);

    match result {
        Ok(run) => {
            state.sessions.set_active_run(&session_id, if run.status.is_terminal() { None } else { Some(run.id) });
            if let Err(e) = state.run_store.insert(run.clone()) {
                tracing::error!(error = %e, "failed to persist run");
            }
            state.mux.send_chunk(&session_id, StreamEvent::RunUpdated { run: Box::new(run.clone()) });
            Json(run).into_response()
        }
        Err(e) => {
            state.mux.send_chunk(&session_id, StreamEvent::Error { error: e.clone() });
            api_error(StatusCode::BAD_GATEWAY, e.message)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmationRequest {
    pub run_id: Uuid,
    pub approved: bool,
}

/// `POST /v1/sessions/:session_id/confirmations`: delivers the client's
/// yes/no reply to a run suspended on `action_confirmation_required`.
pub async fn submit_confirmation(
    State(state): State<AppState>,
    Path(_session_id): Path<String>,
    Json(req): Json<ConfirmationRequest>,
) -> impl IntoResponse {
    if state.confirmations.resolve(req.run_id, req.approved) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Debug, Deserialize)]
pub struct ParametersRequest {
    pub run_id: Uuid,
    pub step_id: String,
    pub fields: serde_json::Value,
}

/// `POST /v1/sessions/:session_id/parameters`: resumes a run suspended on
/// `parameter_collection_required` with client-submitted field values.
pub async fn submit_parameters(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<ParametersRequest>,
) -> Response {
    let Some(run) = state.run_store.get(req.run_id) else {
        return api_error(StatusCode::NOT_FOUND, "unknown run");
    };
    if run.session_id != session_id {
        return api_error(StatusCode::NOT_FOUND, "unknown run");
    }

    let Some(_guard) = state.session_locks.try_acquire(&session_id) else {
        return api_error(StatusCode::CONFLICT, "a turn is already in flight on this session");
    };

    let deps = deps_for(&state, &session_id);
    let mut history = state.history.take(&session_id);

    let result = coordinator::resume_with_parameters(&deps, &mut history, run, &req.step_id, req.fields).await;

    state.history.put(&session_id, history);

    match result {
        Ok(run) => {
            state.sessions.set_active_run(&session_id, if run.status.is_terminal() { None } else { Some(run.id) });
            if let Err(e) = state.run_store.update(run.clone()) {
                tracing::error!(error = %e, "failed to persist run");
            }
            state.mux.send_chunk(&session_id, StreamEvent::RunUpdated { run: Box::new(run.clone()) });
            Json(run).into_response()
        }
        Err(e) => {
            state.mux.send_chunk(&session_id, StreamEvent::Error { error: e.clone() });
            api_error(StatusCode::BAD_GATEWAY, e.message)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_runs_limit")]
    pub limit: usize,
}

fn default_runs_limit() -> usize {
    20
}

/// `GET /v1/sessions/:session_id/runs`: recent runs for a session, newest first.
pub async fn list_runs(State(state): State<AppState>, Path(session_id): Path<String>, Query(query): Query<RunsQuery>) -> impl IntoResponse {
    Json(state.run_store.list_for_session(&session_id, query.limit))
}

/// `GET /v1/runs/:run_id`.
pub async fn get_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    match state.run_store.get(run_id) {
        Some(run) => Json(run).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "unknown run"),
    }
}

#[derive(Debug, Deserialize)]
pub struct DecisionsQuery {
    #[serde(default = "default_decisions_limit")]
    pub limit: usize,
}

fn default_decisions_limit() -> usize {
    50
}

/// `GET /v1/decisions`: operator introspection into recent auto-execute vs.
/// confirm-required outcomes (the Decision audit log, §4 supplement).
pub async fn list_decisions(State(state): State<AppState>, Query(query): Query<DecisionsQuery>) -> impl IntoResponse {
    let records: Vec<serde_json::Value> = state
        .decision_log
        .recent(query.limit)
        .into_iter()
        .map(|r| serde_json::json!({ "runId": r.run_id, "timestamp": r.timestamp, "decision": {
            "autoExecute": r.decision.auto_execute,
            "reason": r.decision.reason,
            "needsUserInput": r.decision.needs_user_input,
            "needsConfirmation": r.decision.needs_confirmation,
        }}))
        .collect();
    Json(serde_json::json!({ "decisions": records }))
}
