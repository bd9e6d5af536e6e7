use futures::future::BoxFuture;

use crate::error::CheckError;

pub use crate::adapters::llm::{ChatMessage, TokenUsage, ToolCall, ToolDefinition, Turn};

#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub api_key: &'a str,
    /// `provider/model`, e.g. `openai/gpt-5-nano`.
    pub model_id: &'a str,
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolDefinition],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub turn: Turn,
    pub usage: TokenUsage,
}

pub trait LlmPort: Send + Sync {
    fn complete<'a>(
        &'a self,
        request: CompletionRequest<'a>,
    ) -> BoxFuture<'a, Result<Completion, CheckError>>;
}
