//! LLM module - chat-completion types and the client trait the pipeline calls.
//! The HTTP implementation lives in `openai`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::error::Result;
use crate::types::ResponseContext;

pub mod openai;
pub mod streaming;

pub use openai::OpenAiCompatibleClient;
pub use streaming::TokenStream;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A chat message on the wire, either sent to or returned by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default)]
    pub content: Option<String>,
    /// Tool calls requested by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: Some(content.into()), tool_calls: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: Some(content.into()), tool_calls: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: Some(content.into()), tool_calls: None }
    }
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content: None, tool_calls: Some(tool_calls) }
    }
}

/// A tool call emitted by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    /// Only `"function"` calls are acted on.
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
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
    /// JSON arguments string, exactly as the model produced it
    pub arguments: String,
}

/// Schema describing a tool the LLM can call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters
    pub parameters: JsonValue,
}

impl ToolSchema {
    /// OpenAI `tools` entry.
    pub fn to_openai(&self) -> JsonValue {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Everything a single completion call needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletionRequest {
    /// Deployment name on Azure, model name elsewhere.
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: usize,
    pub n: u32,
    pub stream: bool,
    pub tools: Vec<ToolSchema>,
}

impl ChatCompletionRequest {
    pub fn to_openai_body(&self) -> JsonValue {
        let mut body = json!({
            "model": self.model,
            "messages": self.messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "n": self.n,
            "stream": self.stream,
        });
        if !self.tools.is_empty() {
            body["tools"] = json!(self.tools.iter().map(ToolSchema::to_openai).collect::<Vec<_>>());
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

/// Completion record returned by the model, optionally carrying pipeline context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletion {
    /// Message of the first choice, if any.
    pub fn first_message(&self) -> Option<&ChatMessage> {
        self.choices.first().map(|c| &c.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ResponseContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Chat-completion capability used by the pipeline.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Non-streaming completion, returning the full record.
    async fn complete(&self, request: &ChatCompletionRequest) -> Result<ChatCompletion>;

    /// Streaming completion yielding content fragments in order.
    async fn complete_stream(&self, request: &ChatCompletionRequest) -> Result<TokenStream>;
}
