//! LLM Collaborator Contract (§6.2): the core requires only a non-streaming
//! `chat` and a streaming `chat_stream`, each tool-call aware. Anything else
//! about the model is opaque.

pub mod http_client;
pub mod types;

use async_trait::async_trait;

use ov_domain::Result;
pub use http_client::HttpLlmClient;
pub use types::{ChatMessage, ChatRequest, ChatResponse, ChatStream, StreamEvent, ToolCallRequest, Usage};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;
    async fn chat_stream(&self, req: ChatRequest) -> Result<ChatStream>;
}
