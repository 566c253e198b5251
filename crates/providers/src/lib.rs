pub mod adapter;
pub mod gateway;
pub mod http_adapter;
pub mod llm;
pub mod sse;
pub mod util;

pub use adapter::{ProviderAdapter, ProviderError};
pub use gateway::ProviderGateway;
pub use http_adapter::{ConnectionTokenResolver, HttpProviderAdapter};
pub use llm::{ChatStream, LlmClient};
