//! Stdio client for an MCP tool server (newline-delimited JSON-RPC 2.0).
//!
//! The NetBox MCP server is launched as a child process. Requests are written
//! one per line to its stdin and answered one per line on its stdout; anything
//! that is not the response to the request in flight is skipped.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::core::ports::tools::{ToolDescriptor, ToolOutcome, ToolPort};
use crate::error::CheckError;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Tools that only read from NetBox.
pub const READ_ONLY_TOOLS: [&str; 4] = [
    "netbox_get_objects",
    "netbox_get_object_by_id",
    "netbox_get_changelogs",
    "netbox_search_objects",
];

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// `None` exposes every tool the server lists.
    pub allowed_tools: Option<Vec<String>>,
}

impl McpServerConfig {
    /// `uv --directory <dir> run netbox-mcp-server`, restricted to read-only tools.
    pub fn netbox(mcp_dir: &Path, netbox_url: &str, netbox_token: &str) -> Self {
        Self {
            command: "uv".to_string(),
            args: vec![
                "--directory".to_string(),
                mcp_dir.display().to_string(),
                "run".to_string(),
                "netbox-mcp-server".to_string(),
            ],
            env: vec![
                ("NETBOX_URL".to_string(), netbox_url.to_string()),
                ("NETBOX_TOKEN".to_string(), netbox_token.to_string()),
            ],
            allowed_tools: Some(READ_ONLY_TOOLS.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

enum RpcReply {
    Result(Value),
    Error(JsonRpcError),
}

struct Channel {
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

pub struct McpClient {
    child: Mutex<Child>,
    channel: Mutex<Channel>,
    allowed: Option<HashSet<String>>,
    calls: AtomicU32,
}

impl McpClient {
    /// Spawns the server and completes the `initialize` handshake.
    pub async fn open(config: &McpServerConfig) -> Result<Self, CheckError> {
        let startup_context = config.display_command();

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CheckError::Connection(format!("failed to start `{startup_context}`: {e}")))?;

        let stdin = child.stdin.take().ok_or_else(|| {
            CheckError::Connection(format!("no stdin handle for `{startup_context}`"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            CheckError::Connection(format!("no stdout handle for `{startup_context}`"))
        })?;

        let client = Self {
            child: Mutex::new(child),
            channel: Mutex::new(Channel {
                stdin: Some(stdin),
                stdout: BufReader::new(stdout),
                next_id: 1,
            }),
            allowed: config
                .allowed_tools
                .as_ref()
                .map(|tools| tools.iter().cloned().collect()),
            calls: AtomicU32::new(0),
        };

        if let Err(err) = client.initialize().await {
            let _ = client.child.lock().await.kill().await;
            let cause = match err {
                CheckError::Connection(msg) | CheckError::Protocol(msg) => msg,
                other => other.to_string(),
            };
            return Err(CheckError::Connection(format!(
                "handshake with `{startup_context}` failed: {cause}"
            )));
        }

        log::debug!("MCP server `{startup_context}` ready");
        Ok(client)
    }

    async fn initialize(&self) -> Result<(), CheckError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        });

        match self.request("initialize", params).await? {
            RpcReply::Result(result) => {
                if let Some(version) = result.get("protocolVersion").and_then(|v| v.as_str()) {
                    log::debug!("MCP server speaks protocol {version}");
                }
            }
            RpcReply::Error(error) => {
                return Err(CheckError::Protocol(format!(
                    "initialize rejected ({}): {}",
                    error.code, error.message
                )));
            }
        }

        self.notify("notifications/initialized").await
    }

    async fn write_line(channel: &mut Channel, request: &JsonRpcRequest<'_>) -> Result<(), CheckError> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| CheckError::Protocol(format!("failed to encode request: {e}")))?;
        line.push('\n');

        let stdin = channel
            .stdin
            .as_mut()
            .ok_or_else(|| CheckError::Connection("MCP server channel is closed".to_string()))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CheckError::Connection(format!("failed to write to MCP server: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| CheckError::Connection(format!("failed to flush MCP server stdin: {e}")))
    }

    async fn notify(&self, method: &str) -> Result<(), CheckError> {
        let mut channel = self.channel.lock().await;
        Self::write_line(
            &mut channel,
            &JsonRpcRequest {
                jsonrpc: "2.0",
                id: None,
                method,
                params: None,
            },
        )
        .await
    }

    async fn request(&self, method: &str, params: Value) -> Result<RpcReply, CheckError> {
        let mut channel = self.channel.lock().await;
        let id = channel.next_id;
        channel.next_id += 1;

        Self::write_line(
            &mut channel,
            &JsonRpcRequest {
                jsonrpc: "2.0",
                id: Some(id),
                method,
                params: Some(params),
            },
        )
        .await?;

        loop {
            let mut line = String::new();
            let read = channel
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| CheckError::Connection(format!("failed to read from MCP server: {e}")))?;
            if read == 0 {
                return Err(CheckError::Protocol(format!(
                    "MCP server closed its output while awaiting `{method}`"
                )));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response: JsonRpcResponse = serde_json::from_str(trimmed).map_err(|e| {
                CheckError::Protocol(format!("unparsable message from MCP server: {e}; payload={trimmed}"))
            })?;

            // Notifications, server-initiated requests and stale responses.
            if response.method.is_some() || response.id.as_ref().and_then(Value::as_u64) != Some(id) {
                log::trace!("skipping MCP message: {trimmed}");
                continue;
            }

            if let Some(error) = response.error {
                return Ok(RpcReply::Error(error));
            }
            return Ok(RpcReply::Result(response.result.unwrap_or(Value::Null)));
        }
    }

    fn is_allowed(&self, name: &str) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |allowed| allowed.contains(name))
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, CheckError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = match self.request("tools/list", params).await? {
                RpcReply::Result(result) => result,
                RpcReply::Error(error) => {
                    return Err(CheckError::Protocol(format!(
                        "tools/list failed ({}): {}",
                        error.code, error.message
                    )));
                }
            };

            let page = result
                .get("tools")
                .cloned()
                .ok_or_else(|| CheckError::Protocol("tools/list result has no `tools`".to_string()))?;
            let page: Vec<ToolDescriptor> = serde_json::from_value(page)
                .map_err(|e| CheckError::Protocol(format!("malformed tools/list result: {e}")))?;
            tools.extend(page);

            cursor = result
                .get("nextCursor")
                .and_then(|c| c.as_str())
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        let listed = tools.len();
        tools.retain(|tool| self.is_allowed(&tool.name));
        log::debug!("MCP catalog: {} of {listed} tools exposed", tools.len());
        Ok(tools)
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<ToolOutcome, CheckError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.is_allowed(name) {
            log::warn!("refusing tool outside the allowlist: {name}");
            return Ok(ToolOutcome::error(format!(
                "tool `{name}` is not available; only read-only tools may be used"
            )));
        }

        let reply = self
            .request("tools/call", json!({ "name": name, "arguments": args }))
            .await?;
        Ok(match reply {
            RpcReply::Error(error) => ToolOutcome::error(error.message),
            RpcReply::Result(result) => outcome_from_result(&result),
        })
    }

    pub fn tool_call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Closes the server's stdin, gives it a moment to exit, then kills it.
    pub async fn shutdown(&self) {
        self.channel.lock().await.stdin.take();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => log::debug!("MCP server exited with {status}"),
            Ok(Err(e)) => log::warn!("waiting for MCP server failed: {e}"),
            Err(_) => {
                log::debug!("MCP server still running after stdin closed; killing it");
                if let Err(e) = child.kill().await {
                    log::warn!("failed to kill MCP server: {e}");
                }
            }
        }
    }
}

fn outcome_from_result(result: &Value) -> ToolOutcome {
    let is_error = result
        .get("isError")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let content = match result.get("content").and_then(|c| c.as_array()) {
        Some(items) => items
            .iter()
            .map(|item| match (item.get("type").and_then(|t| t.as_str()), item.get("text")) {
                (Some("text"), Some(Value::String(text))) => text.clone(),
                _ => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    };

    ToolOutcome { is_error, content }
}

impl ToolPort for McpClient {
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, CheckError>> {
        Box::pin(McpClient::list_tools(self))
    }

    fn invoke<'a>(
        &'a self,
        name: &'a str,
        args: Value,
    ) -> BoxFuture<'a, Result<ToolOutcome, CheckError>> {
        Box::pin(McpClient::invoke(self, name, args))
    }

    fn tool_call_count(&self) -> u32 {
        McpClient::tool_call_count(self)
    }
}
