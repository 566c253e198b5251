//! LLM Collaborator Contract data shapes (§6.2).

use std::pin::Pin;

use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ov_domain::Result;

pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// When `true`, no `tools` are offered (§4.11's summary turn: "no tools
    /// allowed this time").
    #[serde(default)]
    pub force_no_tools: bool,
}

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
    pub finish_reason: Option<String>,
}

/// A streaming delta. Tool-call deltas carry a stable `index` and additive
/// name/arguments fragments (§6.2, §9).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    ContentChunk { text: String },
    ToolCallDelta { index: u32, call_id: Option<String>, name: Option<String>, arguments_fragment: Option<String> },
    Done { usage: Option<Usage>, finish_reason: Option<String> },
    Error { message: String },
}

pub type ChatStream = BoxStream<'static, Result<StreamEvent>>;
