//! Execution Decision (C9, §4.9): a pure function deciding whether a freshly
//! planned run may execute unattended, needs the user to fill in missing
//! arguments, or needs an explicit go-ahead before anything mutates state.
//!
//! Every decision made is also appended to an audit ring buffer so an
//! operator can see recent auto-execute/confirm outcomes without replaying
//! run history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use ov_domain::run::{Step, StepStatus};
use ov_domain::tool::ToolSource;
use ov_tools::ToolCatalog;

/// Tool names containing any of these are treated as mutating/destructive
/// regardless of their declared `source` (§4.9 rule 1).
const DESTRUCTIVE_KEYWORDS: &[&str] = &["delete", "remove", "drop", "destroy", "purge", "wipe"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub auto_execute: bool,
    pub reason: String,
    pub needs_user_input: bool,
    pub needs_confirmation: bool,
}

fn is_destructive(tool_name: &str) -> bool {
    let lower = tool_name.to_lowercase();
    DESTRUCTIVE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// §4.9's five rules, evaluated in order; the first match decides.
///
/// Rule 3's "read-only allow-list (the fetch-family)" is grounded on the
/// existing `ToolSource::Cache` distinction (§3, §4.4): cache-sourced tools
/// are definitionally bulk-synced reads, never mutations, so they are the
/// allow-list rather than a second keyword table to keep in sync with it.
pub fn decide(plan: &[Step], catalog: &ToolCatalog) -> Decision {
    if plan.iter().any(|s| is_destructive(&s.tool_call.name)) {
        return Decision {
            auto_execute: false,
            reason: "one or more steps match a destructive keyword".into(),
            needs_user_input: false,
            needs_confirmation: true,
        };
    }

    if plan.iter().any(|s| s.status == StepStatus::CollectingParameters) {
        return Decision {
            auto_execute: false,
            reason: "one or more steps are missing required parameters".into(),
            needs_user_input: true,
            needs_confirmation: false,
        };
    }

    if let [only] = plan {
        if catalog.get_by_name(&only.tool_call.name).map(|t| t.source) == Some(ToolSource::Cache) {
            return Decision {
                auto_execute: true,
                reason: "single read-only step auto-executes".into(),
                needs_user_input: false,
                needs_confirmation: false,
            };
        }
    }

    if plan.len() > 1 {
        return Decision {
            auto_execute: false,
            reason: "multi-step plan requires confirmation".into(),
            needs_user_input: false,
            needs_confirmation: true,
        };
    }

    Decision {
        auto_execute: false,
        reason: "default policy requires confirmation".into(),
        needs_user_input: false,
        needs_confirmation: true,
    }
}

#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub decision: Decision,
}

/// Bounded audit log of recent [`decide`] outcomes, oldest evicted first.
pub struct DecisionLog {
    inner: Mutex<VecDeque<DecisionRecord>>,
    capacity: usize,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    pub fn record(&self, run_id: Uuid, decision: Decision) {
        let mut inner = self.inner.lock();
        if inner.len() >= self.capacity {
            inner.pop_front();
        }
        inner.push_back(DecisionRecord { timestamp: Utc::now(), run_id, decision });
    }

    /// Most recent records first, capped at `limit`.
    pub fn recent(&self, limit: usize) -> Vec<DecisionRecord> {
        self.inner.lock().iter().rev().take(limit).cloned().collect()
    }
}
