//! Session Registry (§3): attach/detach lifecycle plus the user→sessionIds
//! reverse index the Stream Multiplexer (C7) uses for `broadcastToUser`.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use uuid::Uuid;

use ov_domain::session::Session;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    by_user: RwLock<HashMap<String, HashSet<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a session. Multiple sessions per user are allowed.
    pub fn attach(&self, session_id: impl Into<String>, user_id: impl Into<String>) -> Session {
        let session_id = session_id.into();
        let session = Session::new(session_id.clone(), user_id.into());
        self.by_user.write().entry(session.user_id.clone()).or_default().insert(session_id.clone());
        self.sessions.write().insert(session_id, session.clone());
        session
    }

    /// Removes a session and prunes it from the reverse index. Returns the
    /// removed session, if any, so the caller can cancel its in-flight run.
    pub fn detach(&self, session_id: &str) -> Option<Session> {
        let removed = self.sessions.write().remove(session_id);
        if let Some(session) = &removed {
            if let Some(set) = self.by_user.write().get_mut(&session.user_id) {
                set.remove(session_id);
            }
        }
        removed
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn sessions_for_user(&self, user_id: &str) -> Vec<String> {
        self.by_user.read().get(user_id).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// Records the session's current `activeRun`, or clears it with `None`
    /// once the run terminates. No-op if the session has since detached.
    pub fn set_active_run(&self, session_id: &str, run_id: Option<Uuid>) -> bool {
        match self.sessions.write().get_mut(session_id) {
            Some(session) => {
                session.active_run = run_id;
                session.last_active_at = chrono::Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.last_active_at = chrono::Utc::now();
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// All currently attached session ids, for background sweeps that need
    /// to walk every live session rather than one user's.
    pub fn all_session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }
}
