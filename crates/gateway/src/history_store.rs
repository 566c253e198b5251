//! Per-session conversation history. Kept separate from `RunStore` because
//! history is mutated in place across the lifetime of a turn while a run is
//! only ever inserted/replaced wholesale — the two have different access
//! patterns even though both are session-scoped state.

use std::collections::HashMap;

use parking_lot::Mutex;

use ov_domain::history::ConversationHistory;

/// `Mutex` rather than `RwLock`: every access here is a take-then-put around
/// a turn, never a concurrent read — the single-flight session lock already
/// guarantees only one turn touches a session's history at a time.
#[derive(Default)]
pub struct HistoryStore {
    inner: Mutex<HashMap<String, ConversationHistory>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns a session's history, leaving a fresh empty one in
    /// its place. Callers hold the taken copy across the `await`s of a turn
    /// (a lock guard can't cross those safely) and call [`HistoryStore::put`]
    /// when done.
    pub fn take(&self, session_id: &str) -> ConversationHistory {
        self.inner.lock().remove(session_id).unwrap_or_default()
    }

    pub fn put(&self, session_id: &str, history: ConversationHistory) {
        self.inner.lock().insert(session_id.to_string(), history);
    }

    pub fn clear(&self, session_id: &str) {
        self.inner.lock().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ov_domain::history::HistoryEntry;

    #[test]
    fn take_on_unknown_session_returns_fresh_history() {
        let store = HistoryStore::new();
        let history = store.take("s1");
        assert_eq!(history.entries().len(), 0);
    }

    #[test]
    fn put_then_take_roundtrips() {
        let store = HistoryStore::new();
        let mut history = store.take("s1");
        history.push(HistoryEntry::user("hello"));
        store.put("s1", history);

        let reloaded = store.take("s1");
        assert_eq!(reloaded.entries().len(), 1);
    }

    #[test]
    fn clear_drops_the_entry() {
        let store = HistoryStore::new();
        let mut history = store.take("s1");
        history.push(HistoryEntry::user("hi"));
        store.put("s1", history);

        store.clear("s1");
        assert_eq!(store.take("s1").entries().len(), 0);
    }
}
