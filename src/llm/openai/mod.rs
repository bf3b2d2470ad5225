
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChatCompletion, ChatProvider, ChatRequest, LlmError, ToolDefinition};
use crate::config::OpenAiConfig;
use crate::conversation::{ConversationMessage, ToolCall};
use crate::{RagError, Result};

const PROVIDER: &str = "openai";

/// Chat client for any OpenAI-compatible `/chat/completions` endpoint
#[derive(Clone)]
pub struct OpenAiChat {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl std::fmt::Debug for OpenAiChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChat")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl OpenAiChat {
    /// Create a chat client from the `openai` configuration section
    ///
    /// # Arguments
    /// * `config` - Supplies the base URL, API key, chat model and request timeout
    ///
    /// # Errors
    /// Returns [`RagError::Llm`] if the HTTP client cannot be built
    #[inline]
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RagError::Llm(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.api_base().to_string(),
            api_key: config.api_key.clone(),
            model: config.chat_model.clone(),
            client,
            request_timeout,
        })
    }

    /// Bound each completion, including reading the response body
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Pull the provider's message out of an error body, falling back to the raw text
    fn error_message(body: &str) -> String {
        serde_json::from_str::<ApiErrorBody>(body)
            .map(|parsed| parsed.error.message)
            .unwrap_or_else(|_| body.to_string())
    }

    /// Post one request and return the raw success body
    ///
    /// 429 maps to [`LlmError::RateLimited`], 401 and 403 to
    /// [`LlmError::Authentication`], any other non-success status to [`LlmError::Api`].
    async fn send(&self, request: ChatRequest<'_>) -> std::result::Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: request.tools,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.request_timeout)
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited(Self::error_message(&text)));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::Authentication {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: Self::error_message(&text),
            });
        }

        Ok(text)
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn complete(&self, request: ChatRequest<'_>) -> std::result::Result<ChatCompletion, LlmError> {
        debug!(
            "Chat completion with {} messages and {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let body = tokio::time::timeout(self.request_timeout, self.send(request))
            .await
            .unwrap_or(Err(LlmError::Timeout(self.request_timeout)))
            .inspect_err(|e| warn!("Chat completion failed: {}", e))?;

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Decode(e.to_string()))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(LlmError::EmptyResponse { provider: PROVIDER })?;

        let completion = ChatCompletion {
            content: message.content.unwrap_or_default(),
            tool_calls: message.tool_calls.unwrap_or_default(),
        };
        debug!(
            "Chat completion returned {} chars and {} tool calls",
            completion.content.len(),
            completion.tool_calls.len()
        );
        Ok(completion)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
