//! Conversation Coordinator (C11, §4.11): the per-turn orchestrator tying
//! together history, tool filtering, the Planner, the Execution Decision,
//! and the Plan Executor into the single request/response cycle a turn is.

use std::sync::Arc;

use futures_util::StreamExt;
use uuid::Uuid;

use ov_domain::history::{ConversationHistory, HistoryEntry, Role};
use ov_domain::run::{Run, RunStatus, Step, StepStatus};
use ov_domain::stream::{StreamEvent, StreamTag};
use ov_domain::tool::{ToolCall, ToolDefinition};
use ov_domain::Result;
use ov_providers::llm::{ChatMessage, ChatRequest, ChatResponse, LlmClient, StreamEvent as LlmStreamEvent, ToolCallRequest, Usage};
use ov_sessions::StreamMultiplexer;
use ov_tools::{ToolCatalog, ToolOrchestrator, UserToolFilter};

use crate::cancel::CancelSignal;
use crate::confirmation::ConfirmationGate;
use crate::decision::{decide, Decision, DecisionLog};
use crate::executor::{announce_plan, run_plan};
use crate::planner::{generate_plan, planner_meta_tool, PLANNER_META_TOOL_NAME};

const SUMMARY_FALLBACK: &str = "The actions have been completed successfully.";
const CLIENT_DISCONNECTED: &str = "client_disconnected";

/// Wiring a single coordinator call needs. Bundled rather than threaded as
/// five separate parameters — every field is a long-lived shared handle the
/// gateway constructs once at boot.
pub struct CoordinatorDeps {
    pub llm: Arc<dyn LlmClient>,
    pub catalog: Arc<ToolCatalog>,
    pub filter: Arc<UserToolFilter>,
    pub orchestrator: Arc<ToolOrchestrator>,
    pub mux: Arc<StreamMultiplexer>,
    pub confirmations: Arc<ConfirmationGate>,
    pub decision_log: Arc<DecisionLog>,
    /// This session's cancellation signal (§5). Checked at every suspension
    /// point a turn passes through — an LLM stream read or a step boundary
    /// in the Plan Executor — so a client that disconnects mid-turn gets a
    /// run that lands on `failed`/`client_disconnected` instead of running
    /// to completion for nobody.
    pub cancel: CancelSignal,
}

fn cancelled_run(session_id: &str, user_id: &str, user_input: &str) -> Run {
    let mut run = Run::new(session_id, user_id, user_input);
    run.status = RunStatus::Failed;
    run.failure_reason = Some(CLIENT_DISCONNECTED.into());
    run.ended_at = Some(chrono::Utc::now());
    run
}

/// Closes out a turn with the §6.1/§8-invariant-3 final event, unless the
/// client already disconnected — a disconnected session gets no further
/// events at all, per §5.
fn emit_stream_end(mux: &StreamMultiplexer, cancel: &CancelSignal, session_id: &str, message_id: &str) {
    if !cancel.is_cancelled() {
        mux.send_chunk(session_id, StreamEvent::StreamEnd { message_id: message_id.to_string() });
    }
}

/// Runs one full user turn to completion: plans, decides, possibly suspends
/// for confirmation/parameters, executes, and summarizes. `history` is
/// mutated in place; callers persist it afterwards.
pub async fn handle_turn(
    deps: &CoordinatorDeps,
    history: &mut ConversationHistory,
    session_id: &str,
    user_id: &str,
    user_input: &str,
) -> Result<Run> {
    history.push(HistoryEntry::user(user_input));

    let categories = UserToolFilter::detect_categories(user_input);
    let candidate_tools = deps.filter.tools_by_categories_for_user(user_id, &categories);

    let mut offered = deps.catalog.format_for_llm(&candidate_tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>());
    offered.push(planner_meta_tool());

    let messages = build_messages(history, user_input);
    let message_id = Uuid::new_v4().to_string();
    let Some(response) = stream_and_collect(
        &*deps.llm,
        &deps.mux,
        &deps.cancel,
        session_id,
        &message_id,
        ChatRequest { messages, tools: offered, temperature: Some(0.3), max_tokens: None, force_no_tools: false },
    )
    .await?
    else {
        return Ok(cancelled_run(session_id, user_id, user_input));
    };

    let wants_plan = response.tool_calls.iter().any(|c| c.name == PLANNER_META_TOOL_NAME) || response.tool_calls.len() > 1;

    if response.tool_calls.is_empty() {
        history.push(HistoryEntry::assistant(response.content.clone()));
        let mut run = Run::new(session_id, user_id, user_input);
        run.assistant_response = Some(response.content);
        run.finish(RunStatus::Completed);
        emit_stream_end(&deps.mux, &deps.cancel, session_id, &message_id);
        return Ok(run);
    }

    let mut run = Run::new(session_id, user_id, user_input);

    if wants_plan {
        let tool_refs: Vec<&ToolDefinition> = candidate_tools;
        run.tool_execution_plan = generate_plan(&*deps.llm, &deps.mux, user_input, &tool_refs, session_id, run.id, user_id).await?;
    } else {
        let call = &response.tool_calls[0];
        run.tool_execution_plan = vec![Step::new(
            "step1",
            ToolCall { id: call.call_id.clone(), name: call.name.clone(), arguments: call.arguments.clone(), session_id: session_id.to_string(), user_id: user_id.to_string() },
            "single-step bypass",
        )];
    }

    announce_plan(&run, &deps.mux);
    drive_plan(deps, history, &mut run, session_id, user_input, &message_id).await?;
    Ok(run)
}

/// Resumes a run suspended on `parameter_collection_required`: merges the
/// client-submitted fields into the waiting step's arguments, marks it ready,
/// and replays the same decide/confirm/execute/summarize tail `handle_turn`
/// uses for a freshly planned run.
pub async fn resume_with_parameters(
    deps: &CoordinatorDeps,
    history: &mut ConversationHistory,
    mut run: Run,
    step_id: &str,
    fields: serde_json::Value,
) -> Result<Run> {
    if let Some(step) = run.step_mut(step_id) {
        if let (serde_json::Value::Object(map), serde_json::Value::Object(args)) = (fields, &mut step.tool_call.arguments) {
            for (k, v) in map {
                args.insert(k, v);
            }
        }
        step.status = StepStatus::Ready;
    }

    let session_id = run.session_id.clone();
    let user_input = run.user_input.clone();
    let message_id = Uuid::new_v4().to_string();
    drive_plan(deps, history, &mut run, &session_id, &user_input, &message_id).await?;
    Ok(run)
}

/// Shared tail of a turn once its plan is in hand: decide, suspend for
/// confirmation if needed, execute, and summarize. Used both by a freshly
/// planned turn and by a turn resuming after parameter collection.
/// `turn_message_id` identifies this turn for the closing `stream_end`
/// (§6.1) emitted at every completed/suspended exit point below, except
/// when the client already disconnected.
async fn drive_plan(
    deps: &CoordinatorDeps,
    history: &mut ConversationHistory,
    run: &mut Run,
    session_id: &str,
    user_input: &str,
    turn_message_id: &str,
) -> Result<()> {
    let decision = decide(&run.tool_execution_plan, &deps.catalog);
    deps.decision_log.record(run.id, decision.clone());

    if decision.needs_user_input {
        if let Some(step) = run.tool_execution_plan.iter_mut().find(|s| s.status != StepStatus::Completed) {
            step.status = StepStatus::CollectingParameters;
            let missing = missing_fields(deps.catalog.as_ref(), step);
            deps.mux.send_chunk(
                session_id,
                StreamEvent::ParameterCollectionRequired { run_id: run.id.to_string(), step_id: step.step_id.clone(), missing_fields: missing },
            );
        }
        run.status = RunStatus::Waiting;
        emit_stream_end(&deps.mux, &deps.cancel, session_id, turn_message_id);
        return Ok(());
    }

    if decision.needs_confirmation {
        if !await_confirmation(deps, run, &decision, session_id).await? {
            run.finish(RunStatus::Failed);
            run.failure_reason = Some(if deps.cancel.is_cancelled() { CLIENT_DISCONNECTED.into() } else { "user declined confirmation".into() });
            emit_stream_end(&deps.mux, &deps.cancel, session_id, turn_message_id);
            return Ok(());
        }
    }

    run_plan(run, &deps.orchestrator, &deps.mux, &deps.cancel).await;
    if run.failure_reason.as_deref() == Some(CLIENT_DISCONNECTED) {
        return Ok(());
    }

    inject_tool_results_into_history(history, run);
    let Some(summary) = summarize(deps, history, session_id, user_input).await? else {
        run.finish(RunStatus::Failed);
        run.failure_reason = Some(CLIENT_DISCONNECTED.into());
        return Ok(());
    };
    history.push(HistoryEntry::assistant(summary.clone()));
    run.assistant_response = Some(summary);

    emit_stream_end(&deps.mux, &deps.cancel, session_id, turn_message_id);
    Ok(())
}

/// Suspends the turn on the confirmation gate and waits for the client's
/// reply, or for cancellation. Returns `Ok(true)` only on an explicit
/// approval.
async fn await_confirmation(deps: &CoordinatorDeps, run: &mut Run, decision: &Decision, session_id: &str) -> Result<bool> {
    let steps: Vec<serde_json::Value> =
        run.tool_execution_plan.iter().map(|s| serde_json::json!({ "stepId": s.step_id, "tool": s.tool_call.name })).collect();

    let rx = deps.confirmations.wait_for(run.id);
    deps.mux.send_chunk(
        session_id,
        StreamEvent::ActionConfirmationRequired { run_id: run.id.to_string(), reason: decision.reason.clone(), steps },
    );
    run.status = RunStatus::Waiting;

    match rx.await {
        Ok(reply) => Ok(reply.approved),
        Err(_) => Ok(false),
    }
}

fn missing_fields(catalog: &ToolCatalog, step: &Step) -> Vec<String> {
    match catalog.validate(&step.tool_call.name, &step.tool_call.arguments) {
        Ok(()) => Vec::new(),
        Err(e) => e
            .details
            .and_then(|d| d.get("missingFields").cloned())
            .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
            .unwrap_or_default(),
    }
}

/// Strips any system message from history, prepends a fresh one, and drops
/// empty assistant turns (§4.11) before calling the LLM.
fn build_messages(history: &ConversationHistory, system_prompt: &str) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage { role: "system".into(), content: system_prompt_for(system_prompt), tool_call_id: None, tool_calls: None }];
    for entry in history.entries() {
        if entry.role == Role::System {
            continue;
        }
        if entry.role == Role::Assistant && entry.content.is_empty() {
            continue;
        }
        messages.push(ChatMessage {
            role: role_str(entry.role).into(),
            content: entry.content.clone(),
            tool_call_id: entry.tool_call_id.clone(),
            tool_calls: entry.tool_calls.clone(),
        });
    }
    messages
}

fn system_prompt_for(_user_input: &str) -> String {
    "You are an assistant that can call tools to help the user with email, calendar, and CRM tasks.".into()
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
        Role::System => "system",
    }
}

/// Folds each completed/failed step's result into history as a `tool`
/// message, respecting the 50 KiB drop rule (§8 invariant #15).
fn inject_tool_results_into_history(history: &mut ConversationHistory, run: &Run) {
    for step in &run.tool_execution_plan {
        let Some(result) = &step.result else { continue };
        let content = serde_json::to_string(result).unwrap_or_default();
        if !history.push_tool_result(step.tool_call.id.clone(), content) {
            tracing::warn!(step_id = %step.step_id, "tool result exceeded history size limit, dropped");
        }
    }
}

/// Requests the post-execution summary turn with `force_no_tools: true`,
/// retrying once with an explicit prompt if the first attempt comes back
/// empty, then falling back to a fixed sentence (§4.11). Streamed like any
/// other assistant turn so the client sees the same `conversational_text_segment`
/// vocabulary for the summary as for a plain-text reply.
async fn summarize(deps: &CoordinatorDeps, history: &ConversationHistory, session_id: &str, user_input: &str) -> Result<Option<String>> {
    let messages = build_messages(history, user_input);
    let req = ChatRequest { messages: messages.clone(), tools: vec![], temperature: Some(0.3), max_tokens: None, force_no_tools: true };
    let Some(response) = stream_and_collect(&*deps.llm, &deps.mux, &deps.cancel, session_id, &Uuid::new_v4().to_string(), req).await? else {
        return Ok(None);
    };
    if !response.content.trim().is_empty() {
        return Ok(Some(response.content));
    }

    let mut retry_messages = messages;
    retry_messages.push(ChatMessage {
        role: "user".into(),
        content: "Summarize the actions just taken in one or two sentences.".into(),
        tool_call_id: None,
        tool_calls: None,
    });
    let retry_req = ChatRequest { messages: retry_messages, tools: vec![], temperature: Some(0.3), max_tokens: None, force_no_tools: true };
    let Some(retry) = stream_and_collect(&*deps.llm, &deps.mux, &deps.cancel, session_id, &Uuid::new_v4().to_string(), retry_req).await? else {
        return Ok(None);
    };
    if !retry.content.trim().is_empty() {
        return Ok(Some(retry.content));
    }

    Ok(Some(SUMMARY_FALLBACK.to_string()))
}

/// Accumulates a streaming `chat_stream` call into a [`ChatResponse`]: content
/// chunks are forwarded live as `conversational_text_segment` events, and
/// tool-call deltas are merged by their stable `index` (§9) — concatenating
/// each index's name/arguments fragments across the stream — before the
/// arguments string is parsed as JSON once the stream ends. An unparseable
/// arguments string degrades to an empty object rather than failing the
/// whole turn (§7's `parse_error`, logged once per call).
async fn stream_and_collect(
    llm: &dyn LlmClient,
    mux: &StreamMultiplexer,
    cancel: &CancelSignal,
    session_id: &str,
    message_id: &str,
    request: ChatRequest,
) -> Result<Option<ChatResponse>> {
    if cancel.is_cancelled() {
        return Ok(None);
    }

    let mut stream = llm.chat_stream(request).await?;
    mux.send_chunk(
        session_id,
        StreamEvent::ConversationalTextSegment { message_id: message_id.to_string(), content: String::new(), stream_type: StreamTag::StartStream },
    );

    let mut content = String::new();
    let mut pending: std::collections::BTreeMap<u32, PendingToolCall> = std::collections::BTreeMap::new();
    let mut usage = Usage::default();
    let mut finish_reason = None;
    let mut stream_error = None;

    while let Some(event) = stream.next().await {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        match event {
            Ok(LlmStreamEvent::ContentChunk { text }) => {
                content.push_str(&text);
                mux.send_chunk(
                    session_id,
                    StreamEvent::ConversationalTextSegment { message_id: message_id.to_string(), content: text, stream_type: StreamTag::Streaming },
                );
            }
            Ok(LlmStreamEvent::ToolCallDelta { index, call_id, name, arguments_fragment }) => {
                let entry = pending.entry(index).or_default();
                if let Some(id) = call_id {
                    entry.call_id = Some(id);
                }
                if let Some(n) = name {
                    entry.name.push_str(&n);
                }
                if let Some(frag) = arguments_fragment {
                    entry.arguments.push_str(&frag);
                }
            }
            Ok(LlmStreamEvent::Done { usage: u, finish_reason: fr }) => {
                if let Some(u) = u {
                    usage = u;
                }
                finish_reason = fr;
            }
            Ok(LlmStreamEvent::Error { message }) => {
                stream_error = Some(message);
                break;
            }
            Err(e) => {
                stream_error = Some(e.message.clone());
                break;
            }
        }
    }

    mux.send_chunk(
        session_id,
        StreamEvent::ConversationalTextSegment { message_id: message_id.to_string(), content: String::new(), stream_type: StreamTag::EndStream },
    );

    if let Some(message) = stream_error {
        mux.send_chunk(session_id, StreamEvent::Error { error: ov_domain::Error::internal(message.clone()) });
        return Err(ov_domain::Error::internal(message));
    }

    let tool_calls = pending
        .into_iter()
        .map(|(_, call)| {
            let arguments = if call.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&call.arguments).unwrap_or_else(|_| {
                    tracing::warn!(tool = %call.name, "tool-call arguments did not parse as JSON, defaulting to empty object");
                    serde_json::json!({})
                })
            };
            ToolCallRequest { call_id: call.call_id.unwrap_or_default(), name: call.name, arguments }
        })
        .collect();

    Ok(Some(ChatResponse { content, tool_calls, usage, finish_reason }))
}

#[derive(Default)]
struct PendingToolCall {
    call_id: Option<String>,
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ov_cache::EntityCache;
    use ov_domain::tool::{ParameterSchema, ToolSource};
    use ov_providers::adapter::{ProviderAdapter, ProviderError};
    use ov_providers::gateway::ProviderGateway;
    use ov_providers::llm::{ChatResponse, ChatStream, ToolCallRequest, Usage};
    use ov_tools::UserConnections;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedLlm {
        responses: Vec<ChatResponse>,
        calls: AtomicUsize,
    }

    /// Replays a scripted [`ChatResponse`] as the deltas a real streaming
    /// endpoint would emit: one content chunk, one tool-call delta per call
    /// (full name/arguments in a single fragment), then `Done`.
    fn response_as_stream(response: ChatResponse) -> ChatStream {
        let mut events = Vec::new();
        if !response.content.is_empty() {
            events.push(Ok(LlmStreamEvent::ContentChunk { text: response.content }));
        }
        for (i, call) in response.tool_calls.into_iter().enumerate() {
            events.push(Ok(LlmStreamEvent::ToolCallDelta {
                index: i as u32,
                call_id: Some(call.call_id),
                name: Some(call.name),
                arguments_fragment: Some(call.arguments.to_string()),
            }));
        }
        events.push(Ok(LlmStreamEvent::Done { usage: Some(response.usage), finish_reason: response.finish_reason }));
        Box::pin(futures_util::stream::iter(events))
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.responses.get(i).cloned().unwrap_or_else(|| self.responses.last().unwrap().clone()))
        }
        async fn chat_stream(&self, _req: ChatRequest) -> Result<ChatStream> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self.responses.get(i).cloned().unwrap_or_else(|| self.responses.last().unwrap().clone());
            Ok(response_as_stream(response))
        }
    }

    struct FakeAdapter;

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        fn provider_key(&self) -> &str {
            "gmail"
        }
        async fn warm(&self, _c: &str) -> std::result::Result<(), ProviderError> {
            Ok(())
        }
        async fn fetch_from_cache(&self, _c: &str, _a: &str, _p: &Value) -> std::result::Result<Value, ProviderError> {
            Ok(serde_json::json!([{"id": "e1", "from": "alice@x.com"}]))
        }
        async fn trigger_action(&self, _c: &str, _a: &str, _p: &Value) -> std::result::Result<Value, ProviderError> {
            Ok(serde_json::json!({"sent": true}))
        }
        async fn trigger_sync(&self, _c: &str, _a: &str, _p: &Value) -> std::result::Result<Value, ProviderError> {
            Ok(Value::Null)
        }
    }

    fn fetch_tool() -> ToolDefinition {
        ToolDefinition {
            name: "fetch_emails".into(),
            category: "Email".into(),
            display_name: "Fetch Emails".into(),
            provider_key: Some("gmail".into()),
            source: ToolSource::Cache,
            cache_model: Some("email".into()),
            parameter_schema: ParameterSchema::object(vec![], HashMap::new()),
            description: "d".into(),
        }
    }

    fn deps_with(llm: ScriptedLlm) -> CoordinatorDeps {
        let (deps, _rx) = deps_with_rx(llm);
        deps
    }

    fn deps_with_rx(llm: ScriptedLlm) -> (CoordinatorDeps, ov_sessions::SinkReceiver) {
        let catalog = Arc::new(ToolCatalog::from_definitions(vec![fetch_tool()]));
        let connections = Arc::new(UserConnections::new());
        connections.connect("u1", "gmail", "conn-1");
        let filter = Arc::new(UserToolFilter::new(catalog.clone(), connections.clone()));
        let mut gw = ProviderGateway::new();
        gw.register(Arc::new(FakeAdapter));
        let orchestrator = Arc::new(ToolOrchestrator::new(catalog.clone(), connections, Arc::new(gw), Arc::new(EntityCache::new())));
        let mux = Arc::new(StreamMultiplexer::new());
        let rx = mux.attach("s1");
        let deps = CoordinatorDeps {
            llm: Arc::new(llm),
            catalog,
            filter,
            orchestrator,
            mux,
            confirmations: Arc::new(ConfirmationGate::new()),
            decision_log: Arc::new(DecisionLog::new(100)),
            cancel: CancelSignal::default(),
        };
        (deps, rx)
    }

    fn drain(rx: &mut ov_sessions::SinkReceiver) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn plain_text_turn_with_no_tool_calls_completes_immediately() {
        let llm = ScriptedLlm { responses: vec![ChatResponse { content: "Hi there!".into(), tool_calls: vec![], usage: Usage::default(), finish_reason: Some("stop".into()) }], calls: AtomicUsize::new(0) };
        let deps = deps_with(llm);
        let mut history = ConversationHistory::new();

        let run = handle_turn(&deps, &mut history, "s1", "u1", "hello").await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.assistant_response, Some("Hi there!".to_string()));
    }

    #[tokio::test]
    async fn single_cache_tool_call_auto_executes_and_summarizes() {
        let plan_response = ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCallRequest { call_id: "c1".into(), name: "fetch_emails".into(), arguments: serde_json::json!({}) }],
            usage: Usage::default(),
            finish_reason: Some("tool_calls".into()),
        };
        let summary_response = ChatResponse { content: "Found 1 email from alice.".into(), tool_calls: vec![], usage: Usage::default(), finish_reason: Some("stop".into()) };
        let llm = ScriptedLlm { responses: vec![plan_response, summary_response], calls: AtomicUsize::new(0) };
        let deps = deps_with(llm);
        let mut history = ConversationHistory::new();

        let run = handle_turn(&deps, &mut history, "s1", "u1", "check my email").await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.tool_execution_plan.len(), 1);
        assert_eq!(run.tool_execution_plan[0].status, StepStatus::Completed);
        assert_eq!(run.assistant_response, Some("Found 1 email from alice.".to_string()));
    }

    #[tokio::test]
    async fn empty_summary_falls_back_to_fixed_sentence_after_retry() {
        let plan_response = ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCallRequest { call_id: "c1".into(), name: "fetch_emails".into(), arguments: serde_json::json!({}) }],
            usage: Usage::default(),
            finish_reason: Some("tool_calls".into()),
        };
        let empty1 = ChatResponse { content: String::new(), tool_calls: vec![], usage: Usage::default(), finish_reason: Some("stop".into()) };
        let empty2 = ChatResponse { content: "   ".into(), tool_calls: vec![], usage: Usage::default(), finish_reason: Some("stop".into()) };
        let llm = ScriptedLlm { responses: vec![plan_response, empty1, empty2], calls: AtomicUsize::new(0) };
        let deps = deps_with(llm);
        let mut history = ConversationHistory::new();

        let run = handle_turn(&deps, &mut history, "s1", "u1", "check my email").await.unwrap();
        assert_eq!(run.assistant_response, Some(SUMMARY_FALLBACK.to_string()));
    }

    #[tokio::test]
    async fn cancelled_before_the_turn_starts_yields_a_disconnected_run() {
        use crate::cancel::CancelMap;

        let llm = ScriptedLlm { responses: vec![ChatResponse { content: "Hi there!".into(), tool_calls: vec![], usage: Usage::default(), finish_reason: Some("stop".into()) }], calls: AtomicUsize::new(0) };
        let mut deps = deps_with(llm);
        let cancel_map = CancelMap::new();
        let cancel = cancel_map.register("s1");
        cancel_map.cancel("s1");
        deps.cancel = cancel;
        let mut history = ConversationHistory::new();

        let run = handle_turn(&deps, &mut history, "s1", "u1", "hello").await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure_reason, Some(CLIENT_DISCONNECTED.to_string()));
    }

    /// Invariant #3 (§8): exactly one `isFinal=true` event per turn, and it
    /// must be the last one emitted.
    #[tokio::test]
    async fn plain_text_turn_ends_with_exactly_one_final_event() {
        let llm = ScriptedLlm { responses: vec![ChatResponse { content: "Hi there!".into(), tool_calls: vec![], usage: Usage::default(), finish_reason: Some("stop".into()) }], calls: AtomicUsize::new(0) };
        let (deps, mut rx) = deps_with_rx(llm);
        let mut history = ConversationHistory::new();

        handle_turn(&deps, &mut history, "s1", "u1", "hello").await.unwrap();

        let events = drain(&mut rx);
        let finals: Vec<_> = events.iter().filter(|e| e.is_final()).collect();
        assert_eq!(finals.len(), 1);
        assert!(matches!(events.last(), Some(StreamEvent::StreamEnd { .. })));
    }

    #[tokio::test]
    async fn tool_call_turn_ends_with_exactly_one_final_event_after_summary() {
        let plan_response = ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCallRequest { call_id: "c1".into(), name: "fetch_emails".into(), arguments: serde_json::json!({}) }],
            usage: Usage::default(),
            finish_reason: Some("tool_calls".into()),
        };
        let summary_response = ChatResponse { content: "Found 1 email from alice.".into(), tool_calls: vec![], usage: Usage::default(), finish_reason: Some("stop".into()) };
        let llm = ScriptedLlm { responses: vec![plan_response, summary_response], calls: AtomicUsize::new(0) };
        let (deps, mut rx) = deps_with_rx(llm);
        let mut history = ConversationHistory::new();

        handle_turn(&deps, &mut history, "s1", "u1", "check my email").await.unwrap();

        let events = drain(&mut rx);
        let finals: Vec<_> = events.iter().filter(|e| e.is_final()).collect();
        assert_eq!(finals.len(), 1);
        assert!(matches!(events.last(), Some(StreamEvent::StreamEnd { .. })));
    }

    #[tokio::test]
    async fn cancelled_turn_emits_no_stream_end() {
        use crate::cancel::CancelMap;

        let llm = ScriptedLlm { responses: vec![ChatResponse { content: "Hi there!".into(), tool_calls: vec![], usage: Usage::default(), finish_reason: Some("stop".into()) }], calls: AtomicUsize::new(0) };
        let (mut deps, mut rx) = deps_with_rx(llm);
        let cancel_map = CancelMap::new();
        let cancel = cancel_map.register("s1");
        cancel_map.cancel("s1");
        deps.cancel = cancel;
        let mut history = ConversationHistory::new();

        handle_turn(&deps, &mut history, "s1", "u1", "hello").await.unwrap();

        let events = drain(&mut rx);
        assert!(events.iter().all(|e| !e.is_final()));
    }
}
