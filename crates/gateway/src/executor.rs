//! Plan Executor (C10, §4.10): drives a [`Run`] through its step state
//! machine, resolving placeholders between steps and emitting progress via
//! the Stream Multiplexer. Steps run strictly sequentially — step `i+1`'s
//! placeholder resolution must observe step `i`'s durable result (§5's
//! ordering guarantee), so unlike the teacher's concurrent tool dispatch,
//! this loop never joins steps in parallel.

use chrono::Utc;

use ov_domain::run::{Run, RunStatus, StepStatus};
use ov_domain::stream::StreamEvent;
use ov_sessions::StreamMultiplexer;
use ov_tools::{resolve_placeholders, ToolOrchestrator};

use crate::cancel::CancelSignal;

/// Runs every non-terminal step of `run.tool_execution_plan` in order,
/// mutating `run` in place and emitting `tool_status_update`/`tool_result`
/// through `mux` as it goes. Fail-fast (§9's open question resolved in favor
/// of the spec's hard-coded default): the first failed step marks every
/// later step `skipped` and the run `failed`.
///
/// Checked at each step boundary (§5): a cancelled session aborts the run
/// immediately, marking it `failed`/`client_disconnected` without emitting
/// any further event — the client that cancelled it is gone, and a reconnect
/// reads the terminal state off `GET /runs/:id` instead.
pub async fn run_plan(run: &mut Run, orchestrator: &ToolOrchestrator, mux: &StreamMultiplexer, cancel: &CancelSignal) {
    run.status = RunStatus::Running;

    let mut failed_step_id: Option<String> = None;

    for i in 0..run.tool_execution_plan.len() {
        if cancel.is_cancelled() {
            run.status = RunStatus::Failed;
            run.failure_reason = Some("client_disconnected".into());
            run.ended_at = Some(Utc::now());
            return;
        }

        if run.tool_execution_plan[i].status.is_terminal() {
            continue;
        }

        if let Some(failing) = &failed_step_id {
            let step = &mut run.tool_execution_plan[i];
            step.status = StepStatus::Skipped;
            step.skipped_because_of = Some(failing.clone());
            continue;
        }

        let prior_steps = run.tool_execution_plan[..i].to_vec();
        let (resolved_args, warning) = resolve_placeholders(&run.tool_execution_plan[i].tool_call.arguments, &prior_steps);

        let step = &mut run.tool_execution_plan[i];
        step.tool_call.arguments = resolved_args;
        step.resolution_warning = warning;
        step.status = StepStatus::Executing;
        step.started_at = Some(Utc::now());

        mux.send_chunk(
            &run.session_id,
            StreamEvent::ToolStatusUpdate { run_id: run.id.to_string(), step_id: step.step_id.clone(), status: "executing".into() },
        );

        let call = step.tool_call.clone();
        let result = orchestrator.execute(&call).await;

        let step = &mut run.tool_execution_plan[i];
        step.finished_at = Some(Utc::now());
        step.status = if result.is_success() { StepStatus::Completed } else { StepStatus::Failed };

        mux.send_chunk(
            &run.session_id,
            StreamEvent::ToolStatusUpdate {
                run_id: run.id.to_string(),
                step_id: step.step_id.clone(),
                status: if step.status == StepStatus::Completed { "completed".into() } else { "failed".into() },
            },
        );
        mux.send_chunk(
            &run.session_id,
            StreamEvent::ToolResult {
                run_id: run.id.to_string(),
                step_id: step.step_id.clone(),
                data: result.data.clone(),
                error: result.error.clone(),
            },
        );

        let was_failure = step.status == StepStatus::Failed;
        step.result = Some(result);

        if was_failure {
            failed_step_id = Some(run.tool_execution_plan[i].step_id.clone());
        }
    }

    run.status = if run.all_steps_terminal() && !run.any_step_failed() { RunStatus::Completed } else { RunStatus::Failed };
    run.ended_at = Some(Utc::now());
    if run.status == RunStatus::Failed {
        run.failure_reason = failed_step_id;
    }

    mux.send_chunk(&run.session_id, StreamEvent::RunUpdated { run: Box::new(run.clone()) });
}

/// Emits the once-per-run `plan_generated` event (§4.10). Called by the
/// Conversation Coordinator at plan registration, before execution begins.
pub fn announce_plan(run: &Run, mux: &StreamMultiplexer) {
    let steps: Vec<serde_json::Value> = run
        .tool_execution_plan
        .iter()
        .map(|s| serde_json::json!({ "stepId": s.step_id, "tool": s.tool_call.name, "intent": s.intent }))
        .collect();
    mux.send_chunk(&run.session_id, StreamEvent::PlanGenerated { run_id: run.id.to_string(), steps });
}
