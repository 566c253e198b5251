//! Conversation history (§3, §4.11, §8 invariants #14/#15).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Non-system entries retained in a session's history (§3: "at most N=20").
pub const MAX_HISTORY_ENTRIES: usize = 20;

/// Tool results larger than this are dropped rather than inserted into
/// history (§3, §8 invariant #15).
pub const MAX_TOOL_RESULT_BYTES: usize = 50 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_call_id: None, tool_calls: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_call_id: None, tool_calls: None }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_call_id: None, tool_calls: None }
    }
}

/// Bounded, per-session history. System messages are never retained across
/// turns — a fresh one is prepended by the caller each time (§4.11) — so the
/// bound applies only to non-system entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Append an entry and drop the oldest non-system entries beyond the
    /// bound (§8 invariant #14).
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
        self.trim();
    }

    /// Append a tool result, applying the 50 KiB drop rule. Returns `false`
    /// (and logs nothing itself — the caller warns) if the entry was
    /// dropped.
    pub fn push_tool_result(&mut self, tool_call_id: impl Into<String>, content: String) -> bool {
        if content.len() > MAX_TOOL_RESULT_BYTES {
            return false;
        }
        self.push(HistoryEntry::tool(tool_call_id, content));
        true
    }

    fn trim(&mut self) {
        let non_system = self.entries.iter().filter(|e| e.role != Role::System).count();
        if non_system <= MAX_HISTORY_ENTRIES {
            return;
        }
        let mut to_drop = non_system - MAX_HISTORY_ENTRIES;
        self.entries.retain(|e| {
            if e.role != Role::System && to_drop > 0 {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
    }
}
