use crate::adapters::llm::{
    parse_u64, ChatMessage, FunctionCall, LineBuffer, StreamEvent, TokenUsage, ToolCall, ToolDefinition,
};
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

type DynError = Box<dyn std::error::Error + Send + Sync>;

const RESPONSES_ENDPOINT: &str = "https://api.openai.com/v1/responses";

#[derive(Debug, Serialize)]
struct OpenAIChatCompletionsRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAIStreamOptions>,
}

#[derive(Debug, Serialize)]
struct OpenAIResponsesRequest {
    model: String,
    input: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAIStreamOptions {
    include_usage: bool,
}

pub async fn chat_stream(
    api_key: &str,
    model: &str,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
    tx: mpsc::UnboundedSender<StreamEvent>,
) -> Result<(), DynError> {
    let client = reqwest::Client::new();

    let instructions = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let body = OpenAIResponsesRequest {
        model: model.to_string(),
        input: build_responses_input(messages),
        instructions: (!instructions.is_empty()).then_some(instructions),
        tools: build_responses_tools(tools),
        stream: true,
    };

    let response = client
        .post(RESPONSES_ENDPOINT)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("content-type", "application/json")
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("OpenAI API error ({status}): {body}").into());
    }

    let mut decoder = ResponsesStreamDecoder::default();
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

    decoder.finish(&tx)?;
    let _ = tx.send(StreamEvent::Done);
    Ok(())
}

pub async fn chat_stream_with_endpoint(
    api_key: &str,
    model: &str,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
    tx: mpsc::UnboundedSender<StreamEvent>,
    endpoint: &str,
    provider_name: &str,
) -> Result<(), DynError> {
    let client = reqwest::Client::new();

    let response = client
        .post(endpoint)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("content-type", "application/json")
        .json(&OpenAIChatCompletionsRequest {
            model: model.to_string(),
            messages: build_chat_completion_messages(messages),
            tools: build_chat_completion_tools(tools),
            stream: true,
            stream_options: Some(OpenAIStreamOptions {
                include_usage: true,
            }),
        })
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("{provider_name} API error ({status}): {body}").into());
    }

    let mut decoder = ChatCompletionsStreamDecoder::new(provider_name);
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

fn build_chat_completion_messages(messages: &[ChatMessage]) -> Vec<OpenAIMessage> {
    messages
        .iter()
        .map(|m| {
            let content = if m.content.is_empty() && m.tool_calls.is_some() {
                None
            } else {
                Some(m.content.clone())
            };

            OpenAIMessage {
                role: m.role.clone(),
                content,
                tool_calls: m.tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": tc.r#type,
                                "function": {
                                    "name": tc.function.name,
                                    "arguments": tc.function.arguments
                                }
                            })
                        })
                        .collect::<Vec<_>>()
                }),
                tool_call_id: m.tool_call_id.clone(),
            }
        })
        .collect()
}

fn build_chat_completion_tools(tools: Option<&[ToolDefinition]>) -> Option<Vec<Value>> {
    tools.map(|items| {
        items
            .iter()
            .map(|tool| serde_json::to_value(tool).unwrap_or_else(|_| json!({})))
            .collect::<Vec<_>>()
    })
}

fn build_responses_tools(tools: Option<&[ToolDefinition]>) -> Option<Vec<Value>> {
    tools.map(|items| {
        items
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "name": tool.function.name,
                    "description": tool.function.description,
                    "parameters": tool.function.parameters,
                })
            })
            .collect::<Vec<_>>()
    })
}

fn build_responses_input(messages: &[ChatMessage]) -> Vec<Value> {
    let mut input = Vec::new();

    for message in messages.iter().filter(|m| m.role != "system") {
        match message.role.as_str() {
            "tool" => {
                if let Some(call_id) = message
                    .tool_call_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                {
                    input.push(json!({
                        "type": "function_call_output",
                        "call_id": call_id,
                        "output": message.content,
                    }));
                } else if !message.content.trim().is_empty() {
                    input.push(json!({
                        "role": "user",
                        "content": message.content,
                    }));
                }
            }
            "assistant" => {
                if !message.content.trim().is_empty() {
                    input.push(json!({
                        "role": "assistant",
                        "content": message.content,
                    }));
                }

                if let Some(tool_calls) = &message.tool_calls {
                    for tc in tool_calls {
                        input.push(json!({
                            "type": "function_call",
                            "call_id": tc.id,
                            "name": tc.function.name,
                            "arguments": tc.function.arguments,
                        }));
                    }
                }
            }
            _ => {
                input.push(json!({
                    "role": message.role,
                    "content": message.content,
                }));
            }
        }
    }

    input
}

fn parse_openai_usage(usage: &Value) -> Option<TokenUsage> {
    let cache_read_tokens = parse_u64(
        usage
            .get("input_tokens_details")
            .and_then(|details| details.get("cached_tokens")),
    )
    .or_else(|| {
        parse_u64(
            usage
                .get("prompt_tokens_details")
                .and_then(|details| details.get("cached_tokens")),
        )
    });

    let usage = TokenUsage {
        input_tokens: parse_u64(usage.get("input_tokens"))
            .or_else(|| parse_u64(usage.get("prompt_tokens"))),
        output_tokens: parse_u64(usage.get("output_tokens"))
            .or_else(|| parse_u64(usage.get("completion_tokens"))),
        total_tokens: parse_u64(usage.get("total_tokens")),
        cache_read_tokens,
    };

    (!usage.is_empty()).then_some(usage)
}

fn maybe_emit_openai_usage(tx: &mpsc::UnboundedSender<StreamEvent>, parsed: &Value) {
    let usage = parsed
        .get("usage")
        .and_then(parse_openai_usage)
        .or_else(|| {
            parsed
                .get("response")
                .and_then(|response| response.get("usage"))
                .and_then(parse_openai_usage)
        });
    if let Some(usage) = usage {
        let _ = tx.send(StreamEvent::Usage(usage));
    }
}

fn send_tool_call(tx: &mpsc::UnboundedSender<StreamEvent>, id: String, name: String, args: String) {
    let name = if name.trim().is_empty() {
        "unknown_tool".to_string()
    } else {
        name
    };
    let arguments = if args.trim().is_empty() {
        "{}".to_string()
    } else {
        args
    };
    let _ = tx.send(StreamEvent::ToolCall(ToolCall {
        id,
        r#type: "function".to_string(),
        function: FunctionCall { name, arguments },
    }));
}

/// Decoder for the chat-completions SSE dialect (OpenRouter, Ollama).
struct ChatCompletionsStreamDecoder<'a> {
    provider_name: &'a str,
    tool_calls: BTreeMap<usize, (String, String, String)>,
}

impl<'a> ChatCompletionsStreamDecoder<'a> {
    fn new(provider_name: &'a str) -> Self {
        Self {
            provider_name,
            tool_calls: BTreeMap::new(),
        }
    }

    fn push_line(&mut self, line: &str, tx: &mpsc::UnboundedSender<StreamEvent>) -> Result<(), DynError> {
        let line = line.trim();
        if line.is_empty() || line == "data: [DONE]" {
            return Ok(());
        }

        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let Ok(parsed) = serde_json::from_str::<Value>(data.trim_start()) else {
            return Ok(());
        };

        if let Some(error) = parsed.get("error") {
            let msg = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error");
            return Err(format!("{} error: {msg}", self.provider_name).into());
        }
        maybe_emit_openai_usage(tx, &parsed);

        let Some(choices) = parsed.get("choices").and_then(|c| c.as_array()) else {
            return Ok(());
        };

        for choice in choices {
            let delta = &choice["delta"];

            if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
                if !content.is_empty() {
                    let _ = tx.send(StreamEvent::Text(content.to_string()));
                }
            }

            let Some(tcs) = delta.get("tool_calls").and_then(|t| t.as_array()) else {
                continue;
            };
            for tc in tcs {
                let idx = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
                let entry = self.tool_calls.entry(idx).or_default();

                if let Some(id) = tc.get("id").and_then(|i| i.as_str()) {
                    entry.0 = id.to_string();
                }
                if let Some(func) = tc.get("function") {
                    if let Some(name) = func.get("name").and_then(|n| n.as_str()) {
                        if entry.1.is_empty() {
                            entry.1 = name.to_string();
                        }
                    }
                    if let Some(args) = func.get("arguments").and_then(|a| a.as_str()) {
                        entry.2.push_str(args);
                    }
                }
            }
        }

        Ok(())
    }

    fn finish(self, tx: &mpsc::UnboundedSender<StreamEvent>) {
        for (idx, (id, name, args)) in self.tool_calls {
            let id = if id.trim().is_empty() {
                format!("call_{idx}")
            } else {
                id
            };
            send_tool_call(tx, id, name, args);
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ResponsesToolCallBuffer {
    order: usize,
    item_id: String,
    call_id: String,
    name: String,
    arguments: String,
}

/// Decoder for the Responses API SSE dialect (`event:` + multi-line `data:` blocks).
#[derive(Default)]
struct ResponsesStreamDecoder {
    current_event: Option<String>,
    current_data: String,
    tool_calls: HashMap<String, ResponsesToolCallBuffer>,
    next_order: usize,
}

impl ResponsesStreamDecoder {
    fn push_line(&mut self, line: &str, tx: &mpsc::UnboundedSender<StreamEvent>) -> Result<(), DynError> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.flush_event(tx);
        }
        if let Some(event_name) = line.strip_prefix("event:") {
            self.current_event = Some(event_name.trim().to_string());
            return Ok(());
        }
        if let Some(data) = line.strip_prefix("data:") {
            self.current_data.push_str(data.trim_start());
            self.current_data.push('\n');
        }
        Ok(())
    }

    fn finish(mut self, tx: &mpsc::UnboundedSender<StreamEvent>) -> Result<(), DynError> {
        self.flush_event(tx)?;

        let mut ordered = self.tool_calls.into_values().collect::<Vec<_>>();
        ordered.sort_by_key(|entry| entry.order);
        for entry in ordered {
            let id = if !entry.call_id.trim().is_empty() {
                entry.call_id
            } else if !entry.item_id.trim().is_empty() {
                entry.item_id
            } else {
                uuid::Uuid::new_v4().to_string()
            };
            send_tool_call(tx, id, entry.name, entry.arguments);
        }
        Ok(())
    }

    fn flush_event(&mut self, tx: &mpsc::UnboundedSender<StreamEvent>) -> Result<(), DynError> {
        if self.current_data.is_empty() {
            self.current_event = None;
            return Ok(());
        }
        let event_name = self.current_event.take();
        let data = std::mem::take(&mut self.current_data);
        self.handle_event(tx, event_name.as_deref(), data.trim_end())
    }

    fn handle_event(
        &mut self,
        tx: &mpsc::UnboundedSender<StreamEvent>,
        event_name: Option<&str>,
        data: &str,
    ) -> Result<(), DynError> {
        if data.trim().is_empty() || data.trim() == "[DONE]" {
            return Ok(());
        }

        let parsed: Value = serde_json::from_str(data)?;

        if let Some(error) = parsed.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error");
            return Err(format!("OpenAI error: {message}").into());
        }

        let event_type = event_name
            .or_else(|| parsed.get("type").and_then(|value| value.as_str()))
            .unwrap_or_default();

        if event_type.contains("output_text.delta") {
            if let Some(delta) = parsed.get("delta").and_then(|value| value.as_str()) {
                if !delta.is_empty() {
                    let _ = tx.send(StreamEvent::Text(delta.to_string()));
                }
            }
        } else if event_type.contains("output_item.added") || event_type.contains("output_item.done") {
            if let Some(item) = parsed.get("item") {
                self.record_function_call_item(item, parsed.get("output_index"));
            }
        } else if event_type.contains("function_call_arguments.delta")
            || event_type.contains("function_call_arguments.done")
        {
            self.record_arguments(&parsed, event_type);
        } else if event_type.contains("response.completed") {
            maybe_emit_openai_usage(tx, &parsed);
            if let Some(output) = parsed
                .pointer("/response/output")
                .and_then(|value| value.as_array())
            {
                for item in output {
                    self.record_function_call_item(item, None);
                }
            }
        }

        Ok(())
    }

    fn entry(&mut self, key: String) -> &mut ResponsesToolCallBuffer {
        let next_order = &mut self.next_order;
        self.tool_calls.entry(key).or_insert_with(|| {
            let order = *next_order;
            *next_order += 1;
            ResponsesToolCallBuffer {
                order,
                ..ResponsesToolCallBuffer::default()
            }
        })
    }

    fn record_function_call_item(&mut self, item: &Value, output_index: Option<&Value>) {
        if item.get("type").and_then(|v| v.as_str()) != Some("function_call") {
            return;
        }

        let key = derive_call_key(item.get("id"), item.get("call_id"), output_index);
        let entry = self.entry(key);

        if let Some(item_id) = item.get("id").and_then(|v| v.as_str()) {
            entry.item_id = item_id.to_string();
        }
        if let Some(call_id) = item.get("call_id").and_then(|v| v.as_str()) {
            entry.call_id = call_id.to_string();
        }
        if let Some(name) = item.get("name").and_then(|v| v.as_str()) {
            entry.name = name.to_string();
        }
        if let Some(arguments) = item.get("arguments").and_then(|v| v.as_str()) {
            if !arguments.is_empty() {
                entry.arguments = arguments.to_string();
            }
        }
    }

    fn record_arguments(&mut self, parsed: &Value, event_type: &str) {
        let key = derive_call_key(
            parsed.get("item_id"),
            parsed.get("call_id"),
            parsed.get("output_index"),
        );
        let entry = self.entry(key);

        if let Some(item_id) = parsed.get("item_id").and_then(|v| v.as_str()) {
            entry.item_id = item_id.to_string();
        }

        if event_type.contains("arguments.done") {
            if let Some(arguments) = parsed.get("arguments").and_then(|v| v.as_str()) {
                entry.arguments = arguments.to_string();
            }
        } else if let Some(delta) = parsed.get("delta").and_then(|v| v.as_str()) {
            entry.arguments.push_str(delta);
        }
    }
}

// Output items and argument deltas refer to the same call through the item id.
fn derive_call_key(
    item_id: Option<&Value>,
    call_id: Option<&Value>,
    output_index: Option<&Value>,
) -> String {
    if let Some(item_id) = item_id.and_then(|v| v.as_str()) {
        return format!("item:{item_id}");
    }
    if let Some(call_id) = call_id.and_then(|v| v.as_str()) {
        return format!("call:{call_id}");
    }
    if let Some(index) = output_index.and_then(|v| v.as_u64()) {
        return format!("output:{index}");
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mut rx: mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn chat_completions_decoder_assembles_split_tool_call_arguments() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut decoder = ChatCompletionsStreamDecoder::new("OpenRouter");
        let lines = [
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"netbox_get_objects","arguments":"{\"object_type\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"dcim.device\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"netbox_search_objects","arguments":""}}]}}]}"#,
            r#"data: {"choices":[],"usage":{"prompt_tokens":120,"completion_tokens":30,"total_tokens":150}}"#,
            "data: [DONE]",
        ];
        for line in lines {
            decoder.push_line(line, &tx).unwrap();
        }
        decoder.finish(&tx);
        drop(tx);

        let events = drain(rx);
        let calls: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall(tc) => Some(tc.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].function.arguments, r#"{"object_type":"dcim.device"}"#);
        assert_eq!(calls[1].function.name, "netbox_search_objects");
        assert_eq!(calls[1].function.arguments, "{}");
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::Usage(TokenUsage { total_tokens: Some(150), .. })
        )));
    }

    #[test]
    fn chat_completions_decoder_surfaces_stream_errors() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut decoder = ChatCompletionsStreamDecoder::new("Ollama");
        let err = decoder
            .push_line(r#"data: {"error":{"message":"model not found"}}"#, &tx)
            .unwrap_err();
        assert_eq!(err.to_string(), "Ollama error: model not found");
    }

    #[test]
    fn responses_decoder_merges_item_and_argument_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut decoder = ResponsesStreamDecoder::default();
        let stream = [
            "event: response.output_item.added",
            r#"data: {"type":"response.output_item.added","output_index":0,"item":{"type":"function_call","id":"fc_1","call_id":"call_1","name":"netbox_get_objects","arguments":""}}"#,
            "",
            "event: response.function_call_arguments.delta",
            r#"data: {"type":"response.function_call_arguments.delta","item_id":"fc_1","output_index":0,"delta":"{\"object_type\":\"dcim.device\","}"#,
            "",
            "event: response.function_call_arguments.delta",
            r#"data: {"type":"response.function_call_arguments.delta","item_id":"fc_1","output_index":0,"delta":"\"filters\":{\"site\":\"dm-akron\"}}"}"#,
            "",
            "event: response.completed",
            r#"data: {"type":"response.completed","response":{"usage":{"input_tokens":900,"output_tokens":40,"total_tokens":940}}}"#,
            "",
        ];
        for line in stream {
            decoder.push_line(line, &tx).unwrap();
        }
        decoder.finish(&tx).unwrap();
        drop(tx);

        let events = drain(rx);
        let calls: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall(tc) => Some(tc.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "netbox_get_objects");
        assert_eq!(
            calls[0].function.arguments,
            r#"{"object_type":"dcim.device","filters":{"site":"dm-akron"}}"#
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Usage(TokenUsage { input_tokens: Some(900), .. }))));
    }

    #[test]
    fn responses_decoder_streams_text_deltas() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut decoder = ResponsesStreamDecoder::default();
        for line in [
            "event: response.output_text.delta",
            r###"data: {"delta":"## Status: "}"###,
            "",
            "event: response.output_text.delta",
            r#"data: {"delta":"PASS"}"#,
        ] {
            decoder.push_line(line, &tx).unwrap();
        }
        decoder.finish(&tx).unwrap();
        drop(tx);

        let text: String = drain(rx)
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Text(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(text, "## Status: PASS");
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        use tokio::io::AsyncReadExt;

        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            received.extend_from_slice(&buf[..n]);
            if let Some(head_end) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&received[..head_end]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if received.len() >= head_end + 4 + length {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn chat_completions_stream_keeps_characters_split_across_reads() {
        use tokio::io::AsyncWriteExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!(
            "http://{}/v1/chat/completions",
            listener.local_addr().unwrap()
        );
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Z\u{fc}rich-rtr01 FAIL\"}}]}\n\ndata: [DONE]\n\n"
            .as_bytes()
            .to_vec();
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            socket.write_all(&body[..split]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            socket.write_all(&body[split..]).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        let (tx, rx) = mpsc::unbounded_channel();
        chat_stream_with_endpoint(
            "sk-test",
            "llama3.1:8b",
            &[ChatMessage::user("check")],
            None,
            tx,
            &endpoint,
            "Ollama",
        )
        .await
        .unwrap();
        server.await.unwrap();

        let text: String = drain(rx)
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Text(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Z\u{fc}rich-rtr01 FAIL");
    }

    #[test]
    fn responses_input_pairs_calls_with_outputs() {
        let call = ToolCall::function("call_1", "netbox_get_objects", r#"{"object_type":"dcim.site"}"#);
        let messages = vec![
            ChatMessage::system("rules"),
            ChatMessage::user("check"),
            ChatMessage::assistant_tool_calls("", vec![call.clone()]),
            ChatMessage::tool_result(&call, "[]", false),
        ];

        let input = build_responses_input(&messages);
        assert_eq!(input.len(), 3);
        assert_eq!(input[1]["type"], "function_call");
        assert_eq!(input[1]["call_id"], "call_1");
        assert_eq!(input[2]["type"], "function_call_output");
        assert_eq!(input[2]["output"], "[]");
    }
}
