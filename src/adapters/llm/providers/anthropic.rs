use crate::adapters::llm::{
    parse_u64, ChatMessage, FunctionCall, LineBuffer, StreamEvent, TokenUsage, ToolCall, ToolDefinition,
};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

type DynError = Box<dyn std::error::Error + Send + Sync>;

const MESSAGES_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: serde_json::Value,
}

/// Consecutive tool results collapse into one user message of `tool_result` blocks.
fn build_messages(messages: &[ChatMessage]) -> Vec<AnthropicMessage> {
    let mut result: Vec<AnthropicMessage> = Vec::new();
    let mut pending_tool_results: Vec<serde_json::Value> = Vec::new();

    for m in messages.iter().filter(|m| m.role != "system") {
        if m.role == "tool" {
            let mut block = json!({
                "type": "tool_result",
                "tool_use_id": m.tool_call_id.as_deref().unwrap_or(""),
                "content": m.content
            });
            if m.is_error {
                block["is_error"] = json!(true);
            }
            pending_tool_results.push(block);
            continue;
        }

        if !pending_tool_results.is_empty() {
            result.push(AnthropicMessage {
                role: "user".to_string(),
                content: json!(std::mem::take(&mut pending_tool_results)),
            });
        }

        let content = match (&m.tool_calls, m.role.as_str()) {
            (Some(tool_calls), "assistant") => {
                let mut blocks: Vec<serde_json::Value> = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": m.content}));
                }
                for tc in tool_calls {
                    let input: serde_json::Value =
                        serde_json::from_str(&tc.function.arguments).unwrap_or(json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.function.name,
                        "input": input
                    }));
                }
                json!(blocks)
            }
            _ => json!(m.content),
        };

        result.push(AnthropicMessage {
            role: m.role.clone(),
            content,
        });
    }

    if !pending_tool_results.is_empty() {
        result.push(AnthropicMessage {
            role: "user".to_string(),
            content: json!(pending_tool_results),
        });
    }

    result
}

pub async fn chat_stream(
    api_key: &str,
    model: &str,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
    tx: mpsc::UnboundedSender<StreamEvent>,
) -> Result<(), DynError> {
    let client = reqwest::Client::new();

    let system = messages
        .iter()
        .find(|m| m.role == "system")
        .map(|m| m.content.clone());

    let anthropic_tools = tools.map(|t| {
        t.iter()
            .map(|tool| {
                json!({
                    "name": tool.function.name,
                    "description": tool.function.description,
                    "input_schema": tool.function.parameters
                })
            })
            .collect::<Vec<_>>()
    });

    let response = client
        .post(MESSAGES_ENDPOINT)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .header("content-type", "application/json")
        .json(&AnthropicRequest {
            model: model.to_string(),
            max_tokens: MAX_TOKENS,
            system,
            messages: build_messages(messages),
            tools: anthropic_tools,
            stream: true,
        })
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("Anthropic API error ({}): {}", status, body).into());
    }

    let mut decoder = MessagesStreamDecoder::default();
    let mut stream = response.bytes_stream();
    let mut lines = LineBuffer::default();

    while let Some(chunk) = stream.next().await {
        for line in lines.push(&chunk?) {
            decoder.push_line(&line, &tx)?;
        }
    }
    if let Some(rest) = lines.finish() {
        decoder.push_line(&rest, &tx)?;
    }

    decoder.finish(&tx);
    let _ = tx.send(StreamEvent::Done);
    Ok(())
}

#[derive(Default)]
struct MessagesStreamDecoder {
    current_tool_id: String,
    current_tool_name: String,
    current_tool_input: String,
    usage_totals: TokenUsage,
}

impl MessagesStreamDecoder {
    fn push_line(&mut self, line: &str, tx: &mpsc::UnboundedSender<StreamEvent>) -> Result<(), DynError> {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data.trim_start()) else {
            return Ok(());
        };

        // message_start carries input tokens, message_delta the running output count.
        if let Some(usage) = extract_anthropic_usage(&parsed) {
            self.usage_totals.merge_max_assign(&usage);
        }

        match parsed.get("type").and_then(|t| t.as_str()).unwrap_or("") {
            "content_block_start" => {
                let Some(cb) = parsed.get("content_block") else {
                    return Ok(());
                };
                if cb.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    self.current_tool_id = cb
                        .get("id")
                        .and_then(|i| i.as_str())
                        .unwrap_or("")
                        .to_string();
                    self.current_tool_name = cb
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or("")
                        .to_string();
                    self.current_tool_input.clear();
                }
            }
            "content_block_delta" => {
                let Some(delta) = parsed.get("delta") else {
                    return Ok(());
                };
                match delta.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                let _ = tx.send(StreamEvent::Text(text.to_string()));
                            }
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.get("partial_json").and_then(|p| p.as_str()) {
                            self.current_tool_input.push_str(partial);
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                if !self.current_tool_name.is_empty() {
                    let arguments = if self.current_tool_input.trim().is_empty() {
                        "{}".to_string()
                    } else {
                        std::mem::take(&mut self.current_tool_input)
                    };
                    let _ = tx.send(StreamEvent::ToolCall(ToolCall {
                        id: std::mem::take(&mut self.current_tool_id),
                        r#type: "function".to_string(),
                        function: FunctionCall {
                            name: std::mem::take(&mut self.current_tool_name),
                            arguments,
                        },
                    }));
                    self.current_tool_input.clear();
                }
            }
            "error" => {
                let msg = parsed
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("Unknown error");
                return Err(format!("Anthropic error: {}", msg).into());
            }
            _ => {}
        }

        Ok(())
    }

    fn finish(self, tx: &mpsc::UnboundedSender<StreamEvent>) {
        if !self.usage_totals.is_empty() {
            let _ = tx.send(StreamEvent::Usage(self.usage_totals));
        }
    }
}

fn parse_anthropic_usage(usage: &serde_json::Value) -> Option<TokenUsage> {
    let parsed = TokenUsage {
        input_tokens: parse_u64(usage.get("input_tokens")),
        output_tokens: parse_u64(usage.get("output_tokens")),
        total_tokens: parse_u64(usage.get("total_tokens")),
        cache_read_tokens: parse_u64(usage.get("cache_read_input_tokens")),
    };

    (!parsed.is_empty()).then_some(parsed)
}

fn extract_anthropic_usage(parsed: &serde_json::Value) -> Option<TokenUsage> {
    parsed
        .get("usage")
        .and_then(parse_anthropic_usage)
        .or_else(|| {
            parsed
                .get("message")
                .and_then(|message| message.get("usage"))
                .and_then(parse_anthropic_usage)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_tool_results_share_one_user_message() {
        let first = ToolCall::function("toolu_1", "netbox_get_objects", r#"{"object_type":"dcim.device"}"#);
        let second = ToolCall::function("toolu_2", "netbox_get_object_by_id", "not json");
        let messages = vec![
            ChatMessage::system("rules"),
            ChatMessage::user("Check this compliance rule: every device has a serial"),
            ChatMessage::assistant_tool_calls("", vec![first.clone(), second.clone()]),
            ChatMessage::tool_result(&first, "[]", false),
            ChatMessage::tool_result(&second, "Error: not found", true),
        ];

        let built = build_messages(&messages);
        assert_eq!(built.len(), 3);
        assert_eq!(built[1].role, "assistant");
        assert_eq!(built[1].content[0]["type"], "tool_use");
        assert_eq!(built[1].content[1]["input"], json!({}));
        assert_eq!(built[2].role, "user");
        assert_eq!(built[2].content.as_array().map(Vec::len), Some(2));
        assert_eq!(built[2].content[1]["tool_use_id"], "toolu_2");
        assert!(built[2].content[0].get("is_error").is_none());
        assert_eq!(built[2].content[1]["is_error"], true);
    }

    #[test]
    fn decoder_emits_tool_use_blocks_and_usage() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut decoder = MessagesStreamDecoder::default();
        let lines = [
            "event: message_start",
            r#"data: {"type":"message_start","message":{"usage":{"input_tokens":512,"output_tokens":1}}}"#,
            r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Fetching sites."}}"#,
            r#"data: {"type":"content_block_stop","index":0}"#,
            r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_9","name":"netbox_get_objects","input":{}}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"object_type\":"}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"dcim.site\"}"}}"#,
            r#"data: {"type":"content_block_stop","index":1}"#,
            r#"data: {"type":"message_delta","usage":{"output_tokens":48}}"#,
        ];
        for line in lines {
            decoder.push_line(line, &tx).unwrap();
        }
        decoder.finish(&tx);
        drop(tx);

        let mut text = String::new();
        let mut calls = Vec::new();
        let mut usage = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                StreamEvent::Text(t) => text.push_str(&t),
                StreamEvent::ToolCall(tc) => calls.push(tc),
                StreamEvent::Usage(u) => usage = Some(u),
                StreamEvent::Done => {}
            }
        }

        assert_eq!(text, "Fetching sites.");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_9");
        assert_eq!(calls[0].function.arguments, r#"{"object_type":"dcim.site"}"#);
        let usage = usage.expect("usage emitted");
        assert_eq!(usage.input_tokens, Some(512));
        assert_eq!(usage.output_tokens, Some(48));
    }

    #[test]
    fn decoder_fails_on_error_event() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut decoder = MessagesStreamDecoder::default();
        let err = decoder
            .push_line(
                r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
                &tx,
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "Anthropic error: Overloaded");
    }
}
