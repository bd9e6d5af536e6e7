pub mod providers;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::adapters::providers::{ChatRequest, ProviderRegistry};
use crate::core::ports::llm::{Completion, CompletionRequest, LlmPort};
use crate::error::CheckError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Set on tool results that report a failed lookup.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::plain("assistant", content)
        }
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.function.name.clone()),
            is_error,
            ..Self::plain("tool", content)
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            r#type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub r#type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug)]
pub enum StreamEvent {
    Text(String),
    ToolCall(ToolCall),
    Usage(TokenUsage),
    Done,
}

/// What the model decided to do with one round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    ToolCalls { text: String, calls: Vec<ToolCall> },
    Final(String),
    /// Neither tool calls nor any answer text.
    Malformed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none()
            && self.output_tokens.is_none()
            && self.total_tokens.is_none()
            && self.cache_read_tokens.is_none()
    }

    pub fn saturating_add_assign(&mut self, other: &TokenUsage) {
        self.input_tokens = add_optional(self.input_tokens, other.input_tokens);
        self.output_tokens = add_optional(self.output_tokens, other.output_tokens);
        self.total_tokens = add_optional(self.total_tokens, other.total_tokens);
        self.cache_read_tokens = add_optional(self.cache_read_tokens, other.cache_read_tokens);
    }

    pub fn merge_max_assign(&mut self, other: &TokenUsage) {
        self.input_tokens = max_optional(self.input_tokens, other.input_tokens);
        self.output_tokens = max_optional(self.output_tokens, other.output_tokens);
        self.total_tokens = max_optional(self.total_tokens, other.total_tokens);
        self.cache_read_tokens = max_optional(self.cache_read_tokens, other.cache_read_tokens);
    }
}

fn add_optional(current: Option<u64>, delta: Option<u64>) -> Option<u64> {
    match (current, delta) {
        (Some(lhs), Some(rhs)) => Some(lhs.saturating_add(rhs)),
        (None, Some(rhs)) => Some(rhs),
        (Some(lhs), None) => Some(lhs),
        (None, None) => None,
    }
}

fn max_optional(current: Option<u64>, candidate: Option<u64>) -> Option<u64> {
    match (current, candidate) {
        (Some(lhs), Some(rhs)) => Some(lhs.max(rhs)),
        (None, Some(rhs)) => Some(rhs),
        (Some(lhs), None) => Some(lhs),
        (None, None) => None,
    }
}

pub(crate) fn parse_u64(value: Option<&serde_json::Value>) -> Option<u64> {
    value.and_then(|raw| {
        raw.as_u64().or_else(|| {
            raw.as_i64()
                .and_then(|number| (number >= 0).then_some(number as u64))
        })
    })
}

fn is_auth_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("401")
        || msg.contains("403")
        || msg.contains("unauthorized")
        || msg.contains("forbidden")
        || msg.contains("invalid api key")
        || msg.contains("invalid x-api-key")
}

pub(crate) fn classify_provider_error(provider: &str, message: &str) -> CheckError {
    if is_auth_error(message) {
        CheckError::auth(provider, message)
    } else {
        CheckError::provider(provider, message)
    }
}

/// Splits a streamed response body into lines. Bytes are held until a newline
/// arrives so a multi-byte character split across chunks is decoded whole.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            lines.push(String::from_utf8_lossy(&line[..end]).into_owned());
        }
        lines
    }

    /// Whatever followed the last newline.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Drains everything a provider streamed for one request into a [`Turn`].
pub(crate) fn collect_turn(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> (Turn, TokenUsage) {
    let mut text = String::new();
    let mut calls = Vec::new();
    let mut usage = TokenUsage::default();

    while let Ok(event) = rx.try_recv() {
        match event {
            StreamEvent::Text(chunk) => text.push_str(&chunk),
            StreamEvent::ToolCall(call) => calls.push(call),
            StreamEvent::Usage(delta) => usage.saturating_add_assign(&delta),
            StreamEvent::Done => break,
        }
    }

    let turn = if !calls.is_empty() {
        Turn::ToolCalls { text, calls }
    } else if !text.trim().is_empty() {
        Turn::Final(text)
    } else {
        Turn::Malformed
    };
    (turn, usage)
}

pub struct ChatLlmAdapter {
    registry: ProviderRegistry,
}

impl Default for ChatLlmAdapter {
    fn default() -> Self {
        Self::new(ProviderRegistry::default())
    }
}

impl ChatLlmAdapter {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    async fn complete_turn(&self, request: CompletionRequest<'_>) -> Result<Completion, CheckError> {
        let (provider, model) = self
            .registry
            .resolve_llm(request.model_id)
            .map_err(CheckError::Config)?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let tools = (!request.tools.is_empty()).then_some(request.tools);

        log::debug!(
            "requesting turn from {}:{} ({} messages, {} tools)",
            provider.id(),
            model,
            request.messages.len(),
            request.tools.len()
        );

        provider
            .chat(ChatRequest {
                api_key: request.api_key,
                model,
                messages: request.messages,
                tools,
                tx,
            })
            .await
            .map_err(|error| classify_provider_error(provider.id(), &error.to_string()))?;

        let (turn, usage) = collect_turn(&mut rx);
        Ok(Completion { turn, usage })
    }
}

impl LlmPort for ChatLlmAdapter {
    fn complete<'a>(
        &'a self,
        request: CompletionRequest<'a>,
    ) -> BoxFuture<'a, Result<Completion, CheckError>> {
        Box::pin(self.complete_turn(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_classified_separately() {
        assert!(matches!(
            classify_provider_error("openai", "OpenAI API error (401 Unauthorized): bad key"),
            CheckError::Auth { .. }
        ));
        assert!(matches!(
            classify_provider_error("anthropic", "invalid x-api-key"),
            CheckError::Auth { .. }
        ));
        assert!(matches!(
            classify_provider_error("openai", "OpenAI API error (503): overloaded"),
            CheckError::Provider { .. }
        ));
    }

    #[test]
    fn collect_turn_prefers_tool_calls_over_text() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StreamEvent::Text("Looking up devices".into())).unwrap();
        tx.send(StreamEvent::ToolCall(ToolCall::function("c1", "netbox_get_objects", "{}")))
            .unwrap();
        tx.send(StreamEvent::ToolCall(ToolCall::function("c2", "netbox_get_object_by_id", "{}")))
            .unwrap();
        tx.send(StreamEvent::Done).unwrap();

        let (turn, _) = collect_turn(&mut rx);
        match turn {
            Turn::ToolCalls { text, calls } => {
                assert_eq!(text, "Looking up devices");
                let ids: Vec<_> = calls.iter().map(|c| c.id.as_str()).collect();
                assert_eq!(ids, vec!["c1", "c2"]);
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn collect_turn_joins_text_chunks_into_final_answer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StreamEvent::Text("## Status: ".into())).unwrap();
        tx.send(StreamEvent::Text("PASS".into())).unwrap();
        tx.send(StreamEvent::Usage(TokenUsage {
            input_tokens: Some(10),
            output_tokens: Some(3),
            ..TokenUsage::default()
        }))
        .unwrap();
        drop(tx);

        let (turn, usage) = collect_turn(&mut rx);
        assert_eq!(turn, Turn::Final("## Status: PASS".into()));
        assert_eq!(usage.input_tokens, Some(10));
    }

    #[test]
    fn collect_turn_reports_blank_output_as_malformed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StreamEvent::Text("  \n".into())).unwrap();
        tx.send(StreamEvent::Done).unwrap();

        let (turn, usage) = collect_turn(&mut rx);
        assert_eq!(turn, Turn::Malformed);
        assert!(usage.is_empty());
    }

    #[test]
    fn line_buffer_keeps_characters_split_across_chunks() {
        let bytes = "data: Z\u{fc}rich-rtr01\ndata: [DONE]".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut buffer = LineBuffer::default();
        assert!(buffer.push(&bytes[..split]).is_empty());
        assert_eq!(buffer.push(&bytes[split..]), vec!["data: Z\u{fc}rich-rtr01"]);
        assert_eq!(buffer.finish().as_deref(), Some("data: [DONE]"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn token_usage_accumulates_across_turns() {
        let mut total = TokenUsage::default();
        total.saturating_add_assign(&TokenUsage {
            input_tokens: Some(100),
            ..TokenUsage::default()
        });
        total.saturating_add_assign(&TokenUsage {
            input_tokens: Some(50),
            output_tokens: Some(7),
            ..TokenUsage::default()
        });
        assert_eq!(total.input_tokens, Some(150));
        assert_eq!(total.output_tokens, Some(7));
        assert_eq!(total.total_tokens, None);
    }
}
