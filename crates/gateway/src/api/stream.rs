//! The two transports that carry the Client Stream Vocabulary (§6.1) to a
//! client: a full-duplex WebSocket and a read-only Server-Sent-Events
//! fallback. Both simply drain the [`ov_sessions::StreamMultiplexer`] sink
//! attached for the session — this module never touches orchestration state
//! directly, the way the teacher's transport-layer modules stay thin.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};

use ov_domain::stream::StreamEvent;

use crate::bootstrap::AppState;

/// `GET /v1/sessions/:session_id/stream`: upgrades to a WebSocket and
/// relays every event the core emits for this session, in order, until the
/// client disconnects.
pub async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    if state.sessions.get(&session_id).is_none() {
        return (axum::http::StatusCode::NOT_FOUND, "unknown session").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let mut rx = state.mux.attach(&session_id);
    let (mut sink, mut source) = socket.split();

    send_event(&mut sink, &StreamEvent::ConnectionAck { session_id: session_id.clone() }).await;
    if let Some(session) = state.sessions.get(&session_id) {
        let available = state.filter.available_tools_for_user(&session.user_id);
        let names: Vec<&str> = available.iter().map(|t| t.name.as_str()).collect();
        send_event(&mut sink, &StreamEvent::SessionInit { available_tools: state.catalog.format_for_llm(&names) }).await;
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.mux.detach(&session_id);
    state.cancel_map.cancel(&session_id);
    if let Some(session) = state.sessions.get(&session_id) {
        if let Some(run_id) = session.active_run {
            state.confirmations.abandon(run_id);
        }
    }
}

async fn send_event(sink: &mut (impl futures_util::Sink<Message> + Unpin), event: &StreamEvent) -> Result<(), ()> {
    let text = serde_json::to_string(event).unwrap_or_default();
    sink.send(Message::Text(text)).await.map_err(|_| ())
}

/// `GET /v1/sessions/:session_id/sse`: the same event stream as
/// [`websocket`], encoded as Server-Sent-Events for clients (browsers
/// without a WebSocket stack, `curl`) that can't or won't upgrade.
pub async fn sse(State(state): State<AppState>, Path(session_id): Path<String>) -> Response {
    if state.sessions.get(&session_id).is_none() {
        return (axum::http::StatusCode::NOT_FOUND, "unknown session").into_response();
    }

    let mut rx = state.mux.attach(&session_id);
    let ack = StreamEvent::ConnectionAck { session_id: session_id.clone() };

    let body = stream! {
        yield Ok::<_, Infallible>(Event::default().json_data(&ack).unwrap_or_default());
        while let Some(event) = rx.recv().await {
            let is_final = event.is_final();
            yield Ok(Event::default().json_data(&event).unwrap_or_default());
            if is_final {
                break;
            }
        }
    };

    Sse::new(body).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))).into_response()
}
