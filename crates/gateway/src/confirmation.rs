//! Confirmation gate (§4.9, §4.10): bridges the asynchronous client response
//! to `action_confirmation_required` / `parameter_collection_required` back
//! into the suspended Plan Executor task.
//!
//! One-shot per run: a turn emits at most one of these prompts (§8), so a
//! single `oneshot` channel keyed by run id is enough — no need for the
//! broadcast/queue machinery a multi-prompt-per-run design would need.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

/// What the client sent back in response to a confirmation prompt.
#[derive(Debug, Clone)]
pub struct ConfirmationReply {
    pub approved: bool,
}

#[derive(Default)]
pub struct ConfirmationGate {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<ConfirmationReply>>>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a wait for `run_id`, returning the receiver the Plan
    /// Executor awaits. Replaces any stale prior waiter for the same run.
    pub fn wait_for(&self, run_id: Uuid) -> oneshot::Receiver<ConfirmationReply> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(run_id, tx);
        rx
    }

    /// Delivers a client decision. Returns `false` if nobody was waiting
    /// (run already resolved, cancelled, or unknown).
    pub fn resolve(&self, run_id: Uuid, approved: bool) -> bool {
        match self.pending.lock().remove(&run_id) {
            Some(tx) => tx.send(ConfirmationReply { approved }).is_ok(),
            None => false,
        }
    }

    pub fn abandon(&self, run_id: Uuid) {
        self.pending.lock().remove(&run_id);
    }
}

pub type SharedConfirmationGate = Arc<ConfirmationGate>;
