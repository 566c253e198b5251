//! Stream Multiplexer (C7, §4.7): a process-wide `sessionId → sink` registry.
//! Sinks are transport-agnostic outbound channels — a WebSocket writer task
//! and an SSE writer task both drain the same kind of receiver, so this
//! module only deals in channel handles, never in axum or transport types.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use ov_domain::stream::StreamEvent;

use crate::registry::SessionRegistry;

/// The receiving half handed to a transport-specific writer task on attach.
pub type SinkReceiver = mpsc::UnboundedReceiver<StreamEvent>;

/// A process-wide, thread-safe `sessionId → sink` registry. Sends to the same
/// session are ordered because they all funnel through one channel; a detached
/// session's events are dropped silently rather than erroring the caller.
#[derive(Default)]
pub struct StreamMultiplexer {
    sinks: RwLock<HashMap<String, mpsc::UnboundedSender<StreamEvent>>>,
}

impl StreamMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new sink for `session_id`, returning the receiving half for
    /// the caller's writer task to drain. Replaces any prior sink for the
    /// session (a reconnect supersedes the old connection).
    pub fn attach(&self, session_id: impl Into<String>) -> SinkReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.write().insert(session_id.into(), tx);
        rx
    }

    /// Drops the sink. Safe to call even if the session already detached.
    pub fn detach(&self, session_id: &str) {
        self.sinks.write().remove(session_id);
    }

    pub fn is_attached(&self, session_id: &str) -> bool {
        self.sinks.read().contains_key(session_id)
    }

    /// Sends one event to a single session, in the order this is called
    /// relative to other `send_chunk`/`broadcast_to_user` calls naming the
    /// same session. Silently drops the event if the session is not attached
    /// or its receiver has already been dropped.
    pub fn send_chunk(&self, session_id: &str, event: StreamEvent) {
        let sink = self.sinks.read().get(session_id).cloned();
        match sink {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!(session_id, "stream sink closed, dropping event");
                }
            }
            None => debug!(session_id, "no sink attached, dropping event"),
        }
    }

    /// Fans `event` out to every session currently attached for `user_id`,
    /// resolved via the session registry's reverse index.
    pub fn broadcast_to_user(&self, registry: &SessionRegistry, user_id: &str, event: StreamEvent) {
        for session_id in registry.sessions_for_user(user_id) {
            self.send_chunk(&session_id, event.clone());
        }
    }
}
