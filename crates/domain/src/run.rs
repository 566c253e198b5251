//! Run/Step state machine (§3, §4.10).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;
use crate::tool::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    CollectingParameters,
    Executing,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Normalized outcome of a single tool execution (§4.6: `{status, data?,
/// error?, errorDetails?}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Error,
}

impl StepResult {
    pub fn success(data: Value) -> Self {
        Self {
            status: StepOutcome::Success,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: Error) -> Self {
        Self {
            status: StepOutcome::Error,
            data: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepOutcome::Success
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub tool_call: ToolCall,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
    /// Non-fatal annotation: set when placeholder resolution failed to find
    /// a referenced value (§4.5).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_warning: Option<String>,
    /// Populated when `status = skipped`: the step whose failure caused
    /// this one to be skipped (§4.10).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_because_of: Option<String>,
    /// Free-text description the Planner produced alongside the tool call,
    /// used for display (`plan_generated`, `planner_status`).
    #[serde(default)]
    pub intent: String,
}

impl Step {
    pub fn new(step_id: impl Into<String>, tool_call: ToolCall, intent: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            tool_call,
            status: StepStatus::Ready,
            started_at: None,
            finished_at: None,
            result: None,
            resolution_warning: None,
            skipped_because_of: None,
            intent: intent.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: String,
    pub user_input: String,
    pub tool_execution_plan: Vec<Step>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_response: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Run {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            user_input: user_input.into(),
            tool_execution_plan: Vec::new(),
            status: RunStatus::Pending,
            history_id: None,
            assistant_response: None,
            created_at: Utc::now(),
            ended_at: None,
            failure_reason: None,
        }
    }

    /// Invariant #1 (§8): a terminal run has every step terminal.
    pub fn all_steps_terminal(&self) -> bool {
        self.tool_execution_plan.iter().all(|s| s.status.is_terminal())
    }

    pub fn any_step_failed(&self) -> bool {
        self.tool_execution_plan
            .iter()
            .any(|s| s.status == StepStatus::Failed)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut Step> {
        self.tool_execution_plan.iter_mut().find(|s| s.step_id == step_id)
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.tool_execution_plan.iter().find(|s| s.step_id == step_id)
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolCall;

    fn tool_call(name: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: serde_json::json!({}),
            session_id: "s1".into(),
            user_id: "u1".into(),
        }
    }

    #[test]
    fn all_steps_terminal_true_when_empty() {
        let run = Run::new("s1", "u1", "hi");
        assert!(run.all_steps_terminal());
    }

    #[test]
    fn all_steps_terminal_false_while_executing() {
        let mut run = Run::new("s1", "u1", "hi");
        let mut step = Step::new("step1", tool_call("fetch_emails"), "fetch");
        step.status = StepStatus::Executing;
        run.tool_execution_plan.push(step);
        assert!(!run.all_steps_terminal());
    }

    #[test]
    fn failure_marks_run_status() {
        let mut run = Run::new("s1", "u1", "hi");
        let mut step = Step::new("step1", tool_call("send_email"), "send");
        step.status = StepStatus::Failed;
        run.tool_execution_plan.push(step);
        assert!(run.any_step_failed());
        run.finish(RunStatus::Failed);
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.ended_at.is_some());
    }
}
