use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::llm::FunctionDefinition;
use crate::error::CheckError;

pub use crate::adapters::llm::ToolDefinition;

/// One entry of the query server's tool catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.input_schema.clone(),
            },
        }
    }
}

/// Result of a single tool invocation. Application-level failures set `is_error`
/// and are fed back to the model like any other result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutcome {
    pub is_error: bool,
    pub content: String,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: content.into(),
        }
    }

    /// Text handed back to the model as the tool message.
    pub fn for_model(&self) -> String {
        if self.is_error {
            format!("Error: {}", self.content)
        } else {
            self.content.clone()
        }
    }
}

pub trait ToolPort: Send + Sync {
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, CheckError>>;

    /// Transport failures are `Err`; a failing lookup is `Ok` with `is_error` set.
    fn invoke<'a>(
        &'a self,
        name: &'a str,
        args: Value,
    ) -> BoxFuture<'a, Result<ToolOutcome, CheckError>>;

    /// Invocation attempts so far, successful or not.
    fn tool_call_count(&self) -> u32;
}
