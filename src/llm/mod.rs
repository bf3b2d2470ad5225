// Language model module
// Chat completion capability, tool declarations and failure classification

pub mod openai;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::conversation::{ConversationMessage, ToolCall};

pub use openai::OpenAiChat;

/// A function the model may call, in chat-completions `tools` shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub strict: bool,
    /// JSON Schema of the argument object
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Strict function tool
    #[inline]
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                strict: true,
                parameters,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ConversationMessage],
    /// Empty means the model may not call tools
    pub tools: &'a [ToolDefinition],
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl<'a> ChatRequest<'a> {
    #[inline]
    pub fn new(messages: &'a [ConversationMessage]) -> Self {
        Self {
            messages,
            tools: &[],
            temperature: 0.2,
            max_tokens: None,
        }
    }

    #[inline]
    pub fn with_tools(mut self, tools: &'a [ToolDefinition]) -> Self {
        self.tools = tools;
        self
    }

    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[inline]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// The model's reply: text, requested tool calls, or both
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatCompletion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatCompletion {
    #[inline]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    #[inline]
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<ChatCompletion, LlmError>;

    fn model(&self) -> &str;
}

/// Transport-level failures of a chat completion
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed (HTTP {status})")]
    Authentication { status: u16 },

    #[error("API request failed (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },
}

/// User-safe classification of a failed chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChatFailure {
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimit,

    #[error("Authentication failed. Please check your API key.")]
    Authentication,

    #[error("API error occurred. Please try again later.")]
    Api,

    #[error("An unexpected error occurred. Please try again later.")]
    Unexpected,
}

impl ChatFailure {
    /// Stable machine-readable category name
    #[inline]
    pub fn category(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::Api => "api_error",
            Self::Unexpected => "unexpected",
        }
    }
}

impl From<&LlmError> for ChatFailure {
    #[inline]
    fn from(error: &LlmError) -> Self {
        match error {
            LlmError::RateLimited(_) => Self::RateLimit,
            LlmError::Authentication { .. } => Self::Authentication,
            LlmError::Api { .. } | LlmError::Timeout(_) | LlmError::Transport(_) => Self::Api,
            LlmError::Decode(_) | LlmError::EmptyResponse { .. } => Self::Unexpected,
        }
    }
}
