//! OpenAI-compatible chat-completions client. Works against any endpoint
//! that follows the `/chat/completions` wire format (OpenAI itself, Azure
//! OpenAI, local gateways, etc.) — the core only ever talks to it through
//! [`LlmClient`].

use async_trait::async_trait;
use serde_json::Value;

use ov_domain::{Error, Result};

use super::types::{ChatRequest, ChatResponse, ChatStream, StreamEvent, ToolCallRequest, Usage};
use super::LlmClient;
use crate::sse::sse_response_stream;
use crate::util::from_reqwest;

pub struct HttpLlmClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(message_to_openai).collect();
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if !req.tools.is_empty() && !req.force_no_tools {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| serde_json::json!({ "type": "function", "function": t }))
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(m) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(m);
        }
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }
}

fn message_to_openai(m: &super::types::ChatMessage) -> Value {
    let mut obj = serde_json::json!({ "role": m.role, "content": m.content });
    if let Some(id) = &m.tool_call_id {
        obj["tool_call_id"] = Value::String(id.clone());
    }
    if let Some(calls) = &m.tool_calls {
        obj["tool_calls"] = Value::Array(calls.clone());
    }
    obj
}

fn parse_usage(v: &Value) -> Usage {
    Usage {
        prompt_tokens: v.get("prompt_tokens").and_then(|x| x.as_u64()).unwrap_or(0) as u32,
        completion_tokens: v.get("completion_tokens").and_then(|x| x.as_u64()).unwrap_or(0) as u32,
        total_tokens: v.get("total_tokens").and_then(|x| x.as_u64()).unwrap_or(0) as u32,
    }
}

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::internal("no choices in LLM response"))?;
    let message = choice.get("message").ok_or_else(|| Error::internal("no message in choice"))?;
    let content = message.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let finish_reason = choice.get("finish_reason").and_then(|v| v.as_str()).map(String::from);
    let usage = body.get("usage").map(parse_usage).unwrap_or_default();

    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let call_id = tc.get("id")?.as_str()?.to_string();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                    let arguments: Value = serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
                    Some(ToolCallRequest { call_id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse { content, tool_calls, usage, finish_reason })
}

fn parse_sse_chunk(v: &Value) -> Vec<Result<StreamEvent>> {
    let Some(choice) = v.get("choices").and_then(|c| c.as_array()).and_then(|a| a.first()) else {
        if let Some(usage) = v.get("usage") {
            return vec![Ok(StreamEvent::Done { usage: Some(parse_usage(usage)), finish_reason: None })];
        }
        return vec![];
    };
    let delta = choice.get("delta").cloned().unwrap_or(Value::Null);
    let mut out = Vec::new();

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            out.push(Ok(StreamEvent::ContentChunk { text: text.to_string() }));
        }
    }

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            let call_id = tc.get("id").and_then(|v| v.as_str()).map(String::from);
            let name = tc.get("function").and_then(|f| f.get("name")).and_then(|v| v.as_str()).map(String::from);
            let args = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .map(String::from);
            out.push(Ok(StreamEvent::ToolCallDelta { index, call_id, name, arguments_fragment: args }));
        }
    }

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        let usage = v.get("usage").map(parse_usage);
        out.push(Ok(StreamEvent::Done { usage, finish_reason: Some(fr.to_string()) }));
    }

    out
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req, false);
        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::provider("llm", format!("HTTP {} - {text}", status.as_u16())));
        }
        let parsed: Value = serde_json::from_str(&text)?;
        parse_chat_response(&parsed)
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<ChatStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req, true);
        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::provider("llm", format!("HTTP {} - {text}", status.as_u16())));
        }
        Ok(sse_response_stream(resp, move |data| {
            if data.trim() == "[DONE]" {
                return vec![];
            }
            match serde_json::from_str::<Value>(data) {
                Ok(v) => parse_sse_chunk(&v),
                Err(e) => vec![Err(Error::parse_error(e.to_string()))],
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_non_streaming_response_with_tool_call() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "",
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "fetch_emails", "arguments": "{\"limit\":3}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let parsed = parse_chat_response(&body).unwrap();
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "fetch_emails");
        assert_eq!(parsed.usage.total_tokens, 15);
    }

    #[test]
    fn stream_chunk_accumulates_tool_call_fragments_by_index() {
        let first = serde_json::json!({
            "choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "fetch_emails", "arguments": ""}}]}}]
        });
        let second = serde_json::json!({
            "choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"limit\":3}"}}]}}]
        });
        let out1 = parse_sse_chunk(&first);
        let out2 = parse_sse_chunk(&second);
        assert_eq!(out1.len(), 1);
        assert_eq!(out2.len(), 1);
        match out2[0].as_ref().unwrap() {
            StreamEvent::ToolCallDelta { index, arguments_fragment, .. } => {
                assert_eq!(*index, 0);
                assert_eq!(arguments_fragment.as_deref(), Some("{\"limit\":3}"));
            }
            _ => panic!("expected ToolCallDelta"),
        }
    }
}
