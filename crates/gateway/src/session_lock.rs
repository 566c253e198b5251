//! Per-session single-flight lock (§5: "concurrent turns on the same session
//! are not supported and must be rejected"). One `Semaphore(1)` per session,
//! acquired for the lifetime of a turn; a second concurrent request on the
//! same session fails `try_acquire` immediately rather than queuing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Default)]
pub struct SessionLocks {
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// Returned by [`SessionLocks::try_acquire`]; the session stays busy for as
/// long as this permit lives.
pub struct SessionGuard(#[allow(dead_code)] OwnedSemaphorePermit);

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore_for(&self, session_id: &str) -> Arc<Semaphore> {
        self.semaphores.lock().entry(session_id.to_string()).or_insert_with(|| Arc::new(Semaphore::new(1))).clone()
    }

    /// Attempts to claim the session for a new turn. Returns `None` if a turn
    /// is already in flight on this session.
    pub fn try_acquire(&self, session_id: &str) -> Option<SessionGuard> {
        let sem = self.semaphore_for(session_id);
        sem.try_acquire_owned().ok().map(SessionGuard)
    }

    /// Drops the session's semaphore entry. Called alongside the other
    /// per-session teardown (mux, cancel signal, history) on detach, since
    /// session ids are rarely reused and this map would otherwise grow for
    /// as long as the process runs.
    pub fn remove(&self, session_id: &str) {
        self.semaphores.lock().remove(session_id);
    }
}
