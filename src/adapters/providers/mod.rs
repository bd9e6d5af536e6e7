use crate::adapters::llm::{self, ChatMessage, StreamEvent, ToolDefinition};
use futures::future::BoxFuture;
use std::collections::HashMap;
use tokio::sync::mpsc;

type DynError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub api_key: &'a str,
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub tools: Option<&'a [ToolDefinition]>,
    pub tx: mpsc::UnboundedSender<StreamEvent>,
}

pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;
    fn chat<'a>(&'a self, request: ChatRequest<'a>) -> BoxFuture<'a, Result<(), DynError>>;
}

pub struct ProviderRegistry {
    llm: HashMap<String, Box<dyn LlmProvider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_llm(Box::new(OpenAiLlmProvider));
        registry.register_llm(Box::new(AnthropicLlmProvider));
        registry.register_llm(Box::new(OpenAiCompatibleProvider {
            id: "openrouter",
            display_name: "OpenRouter",
            endpoint: "https://openrouter.ai/api/v1/chat/completions",
        }));
        registry.register_llm(Box::new(OpenAiCompatibleProvider {
            id: "ollama",
            display_name: "Ollama",
            endpoint: "http://localhost:11434/v1/chat/completions",
        }));
        registry
    }
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            llm: HashMap::new(),
        }
    }

    pub fn register_llm(&mut self, provider: Box<dyn LlmProvider>) {
        self.llm.insert(provider.id().to_string(), provider);
    }

    pub fn resolve_llm<'a>(
        &'a self,
        model_id: &'a str,
    ) -> Result<(&'a dyn LlmProvider, &'a str), String> {
        let (provider_id, model) = split_model_id(model_id)?;
        let provider = self.llm.get(provider_id).ok_or_else(|| {
            format!(
                "Unsupported LLM provider '{provider_id}'. Known providers: {}",
                self.llm_provider_ids().join(", ")
            )
        })?;
        Ok((provider.as_ref(), model))
    }

    pub fn llm_provider_ids(&self) -> Vec<String> {
        let mut ids = self.llm.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }
}

/// Splits `provider/model` (or the older `provider:model`) at the first separator.
///
/// Everything after the first `/` belongs to the model, so OpenRouter slugs such
/// as `openrouter/anthropic/claude-sonnet-4` keep their vendor prefix.
pub fn split_model_id(model_id: &str) -> Result<(&str, &str), String> {
    let trimmed = model_id.trim();
    let (provider, model) = trimmed
        .split_once('/')
        .or_else(|| trimmed.split_once(':'))
        .ok_or_else(|| format!("Invalid model id '{trimmed}'. Expected provider/model"))?;

    let provider = provider.trim();
    let model = model.trim();

    if provider.is_empty() || model.is_empty() {
        return Err(format!(
            "Invalid model id '{trimmed}'. Provider and model must be non-empty"
        ));
    }

    Ok((provider, model))
}

struct OpenAiLlmProvider;
struct AnthropicLlmProvider;

struct OpenAiCompatibleProvider {
    id: &'static str,
    display_name: &'static str,
    endpoint: &'static str,
}

impl LlmProvider for OpenAiLlmProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn chat<'a>(&'a self, request: ChatRequest<'a>) -> BoxFuture<'a, Result<(), DynError>> {
        Box::pin(async move {
            llm::providers::openai::chat_stream(
                request.api_key,
                request.model,
                request.messages,
                request.tools,
                request.tx,
            )
            .await
        })
    }
}

impl LlmProvider for AnthropicLlmProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn chat<'a>(&'a self, request: ChatRequest<'a>) -> BoxFuture<'a, Result<(), DynError>> {
        Box::pin(async move {
            llm::providers::anthropic::chat_stream(
                request.api_key,
                request.model,
                request.messages,
                request.tools,
                request.tx,
            )
            .await
        })
    }
}

impl LlmProvider for OpenAiCompatibleProvider {
    fn id(&self) -> &str {
        self.id
    }

    fn chat<'a>(&'a self, request: ChatRequest<'a>) -> BoxFuture<'a, Result<(), DynError>> {
        Box::pin(async move {
            llm::providers::openai::chat_stream_with_endpoint(
                request.api_key,
                request.model,
                request.messages,
                request.tools,
                request.tx,
                self.endpoint,
                self.display_name,
            )
            .await
        })
    }
}
