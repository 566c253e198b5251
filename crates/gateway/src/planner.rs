//! Planner (C8, §4.8): LLM-mediated compilation of a user turn plus the
//! candidate tool set into an ordered [`Step`] list.
//!
//! The planner never executes anything itself — it only produces the ordered
//! plan and announces each step as it's determined. The Plan Executor (C10)
//! is the only thing that runs steps.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use ov_domain::run::Step;
use ov_domain::stream::StreamEvent;
use ov_domain::tool::{ToolCall, ToolDefinition};
use ov_domain::{Error, Result};
use ov_providers::llm::{ChatMessage, ChatRequest, LlmClient};
use ov_sessions::StreamMultiplexer;

/// One raw step as the LLM returns it, before stepId assignment and
/// candidate-set validation.
#[derive(Debug, Deserialize)]
struct PlannedStep {
    intent: String,
    tool: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct PlannerOutput {
    #[serde(default)]
    steps: Vec<PlannedStep>,
}

/// `generatePlan` (§4.8). Rejects the whole plan — returning an error —
/// if the LLM names a tool outside `candidate_tools` or returns no steps.
pub async fn generate_plan(
    llm: &dyn LlmClient,
    mux: &StreamMultiplexer,
    user_input: &str,
    candidate_tools: &[&ToolDefinition],
    session_id: &str,
    run_id: Uuid,
    user_id: &str,
) -> Result<Vec<Step>> {
    let tool_names: Vec<&str> = candidate_tools.iter().map(|t| t.name.as_str()).collect();
    let tool_defs: Vec<Value> = candidate_tools.iter().map(|t| t.to_llm_function()).collect();

    let prompt = format!(
        "You are a planning assistant. Given the user's request and the \
         available tools below, produce a JSON object {{\"steps\": [{{\"intent\": \
         \"<prose>\", \"tool\": \"<tool name>\", \"arguments\": {{...}}}}]}}. \
         Use placeholders like {{{{stepId.field.path}}}} to reference an \
         earlier step's result. Only use tools from the list. User request: {user_input}"
    );

    let req = ChatRequest {
        messages: vec![
            ChatMessage { role: "system".into(), content: prompt, tool_call_id: None, tool_calls: None },
            ChatMessage { role: "user".into(), content: user_input.to_string(), tool_call_id: None, tool_calls: None },
        ],
        tools: tool_defs,
        temperature: Some(0.2),
        max_tokens: None,
        force_no_tools: false,
    };

    let response = llm.chat(req).await?;

    let output: PlannerOutput = serde_json::from_str(&response.content)
        .map_err(|e| Error::parse_error(format!("planner output did not parse: {e}")))?;

    if output.steps.is_empty() {
        return Err(Error::parse_error("planner returned no steps"));
    }

    let mut steps = Vec::with_capacity(output.steps.len());
    for (i, planned) in output.steps.into_iter().enumerate() {
        if !tool_names.contains(&planned.tool.as_str()) {
            return Err(Error::parse_error(format!(
                "planner proposed unknown tool '{}'",
                planned.tool
            )));
        }

        let step_id = format!("step{}", i + 1);
        let call = ToolCall {
            id: Uuid::new_v4().to_string(),
            name: planned.tool.clone(),
            arguments: planned.arguments,
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
        };
        let step = Step::new(step_id.clone(), call, planned.intent.clone());

        mux.send_chunk(
            session_id,
            StreamEvent::PlannerStatus {
                run_id: run_id.to_string(),
                step_id,
                intent: planned.intent,
                tool: planned.tool,
            },
        );

        steps.push(step);
    }

    Ok(steps)
}

/// The meta-tool the Conversation Coordinator offers the LLM alongside the
/// user-filtered catalog; electing it signals "this needs a multi-step plan"
/// rather than a direct single-tool call (§4.11).
pub fn planner_meta_tool() -> Value {
    serde_json::json!({
        "name": "__planner",
        "description": "Invoke for requests that require multiple coordinated tool calls or data passed between steps.",
        "parameters": { "type": "object", "properties": {} },
    })
}

pub const PLANNER_META_TOOL_NAME: &str = "__planner";

pub type SharedLlmClient = Arc<dyn LlmClient>;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ov_domain::tool::{ParameterSchema, ToolSource};
    use ov_providers::llm::{ChatResponse, ChatStream, Usage};
    use std::collections::HashMap;

    struct FakeLlm {
        content: String,
    }

    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse { content: self.content.clone(), tool_calls: vec![], usage: Usage::default(), finish_reason: Some("stop".into()) })
        }

        async fn chat_stream(&self, _req: ChatRequest) -> Result<ChatStream> {
            unimplemented!("not used in planner tests")
        }
    }

    fn fetch_tool() -> ToolDefinition {
        ToolDefinition {
            name: "fetch_emails".into(),
            category: "email".into(),
            display_name: "Fetch Emails".into(),
            provider_key: Some("gmail".into()),
            source: ToolSource::Cache,
            cache_model: None,
            parameter_schema: ParameterSchema::object(vec![], HashMap::new()),
            description: "d".into(),
        }
    }

    #[tokio::test]
    async fn valid_plan_assigns_step_ids_and_announces_status() {
        let llm = FakeLlm {
            content: serde_json::json!({
                "steps": [{"intent": "find the email", "tool": "fetch_emails", "arguments": {"query": "from:alice"}}]
            })
            .to_string(),
        };
        let mux = StreamMultiplexer::new();
        let mut rx = mux.attach("sess-1");
        let tool = fetch_tool();
        let steps = generate_plan(&llm, &mux, "find email", &[&tool], "sess-1", Uuid::new_v4(), "u1").await.unwrap();

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step_id, "step1");
        assert!(matches!(rx.try_recv().unwrap(), StreamEvent::PlannerStatus { .. }));
    }

    #[tokio::test]
    async fn unknown_tool_rejects_whole_plan() {
        let llm = FakeLlm {
            content: serde_json::json!({"steps": [{"intent": "x", "tool": "delete_everything", "arguments": {}}]}).to_string(),
        };
        let mux = StreamMultiplexer::new();
        mux.attach("sess-1");
        let tool = fetch_tool();
        let err = generate_plan(&llm, &mux, "x", &[&tool], "sess-1", Uuid::new_v4(), "u1").await.unwrap_err();
        assert_eq!(err.kind, ov_domain::ErrorKind::ParseError);
    }

    #[tokio::test]
    async fn empty_steps_rejects_plan() {
        let llm = FakeLlm { content: serde_json::json!({"steps": []}).to_string() };
        let mux = StreamMultiplexer::new();
        mux.attach("sess-1");
        let tool = fetch_tool();
        let err = generate_plan(&llm, &mux, "x", &[&tool], "sess-1", Uuid::new_v4(), "u1").await.unwrap_err();
        assert_eq!(err.kind, ov_domain::ErrorKind::ParseError);
    }

    #[tokio::test]
    async fn unparseable_output_is_parse_error() {
        let llm = FakeLlm { content: "not json".into() };
        let mux = StreamMultiplexer::new();
        mux.attach("sess-1");
        let tool = fetch_tool();
        let err = generate_plan(&llm, &mux, "x", &[&tool], "sess-1", Uuid::new_v4(), "u1").await.unwrap_err();
        assert_eq!(err.kind, ov_domain::ErrorKind::ParseError);
    }
}
