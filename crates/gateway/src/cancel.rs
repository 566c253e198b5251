//! Per-session cancellation signal (§5: "a session's cancellation signal
//! flips when the client detaches mid-turn; the in-flight turn checks it at
//! every suspension point and stops emitting further events").
//!
//! Deliberately the simplest primitive that satisfies that contract: one
//! flag per session, checked cooperatively. No `CancellationToken` — nothing
//! here needs child-token fan-out, just "is this session still wanted".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Clone)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An always-live signal, for call sites with no session to key a real one
/// off (tests, or a turn driven outside the HTTP/session layer).
impl Default for CancelSignal {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
}

#[derive(Default)]
pub struct CancelMap {
    flags: RwLock<HashMap<String, Arc<AtomicBool>>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh (un-cancelled) signal for a session, replacing any
    /// stale one left over from a prior turn.
    pub fn register(&self, session_id: &str) -> CancelSignal {
        let flag = Arc::new(AtomicBool::new(false));
        self.flags.write().insert(session_id.to_string(), flag.clone());
        CancelSignal(flag)
    }

    /// Flips the session's signal, if one is registered. Called on detach.
    pub fn cancel(&self, session_id: &str) {
        if let Some(flag) = self.flags.read().get(session_id) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Returns a clone of the session's signal, if one is registered, for a
    /// turn handler to hold and check at its own suspension points.
    pub fn get(&self, session_id: &str) -> Option<CancelSignal> {
        self.flags.read().get(session_id).cloned().map(CancelSignal)
    }

    /// Drops the session's entry once its turn has finished.
    pub fn clear(&self, session_id: &str) {
        self.flags.write().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_signal_is_not_cancelled() {
        let map = CancelMap::new();
        let sig = map.register("s1");
        assert!(!sig.is_cancelled());
    }

    #[test]
    fn cancel_flips_the_registered_signal() {
        let map = CancelMap::new();
        let sig = map.register("s1");
        map.cancel("s1");
        assert!(sig.is_cancelled());
    }

    #[test]
    fn cancel_on_unknown_session_is_noop() {
        let map = CancelMap::new();
        map.cancel("ghost");
    }

    #[test]
    fn clear_removes_the_entry() {
        let map = CancelMap::new();
        map.register("s1");
        map.clear("s1");
        map.cancel("s1");
    }

    #[test]
    fn re_registering_starts_a_fresh_uncancelled_signal() {
        let map = CancelMap::new();
        let first = map.register("s1");
        map.cancel("s1");
        assert!(first.is_cancelled());

        let second = map.register("s1");
        assert!(!second.is_cancelled());
    }
}
