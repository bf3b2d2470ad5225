//! Tool registration and dispatch for the chat engine
//!
//! Tools are declared to the model through [`ToolDefinition`]s and executed by
//! [`ToolHandler`]s looked up by function name.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{DEFAULT_TOP_K, RetrievalAgent};
use crate::conversation::ToolCall;
use crate::llm::ToolDefinition;

pub const RAG_AGENT_TOOL: &str = "rag_agent_tool";

/// Executes one tool on behalf of a tenant
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Run the tool with the model-supplied arguments, returning the tool message content
    async fn handle(&self, user_id: &str, arguments: &serde_json::Value) -> Result<String>;
}

/// Declaration of `rag_agent_tool`, a wire contract with the model provider
#[inline]
pub fn rag_agent_tool_definition() -> ToolDefinition {
    ToolDefinition::function(
        RAG_AGENT_TOOL,
        "Retrieves relevant information from the documents uploaded by the user",
        json!({
            "type": "object",
            "properties": {
                "user_query": {
                    "type": "string",
                    "description": "user query to retrieve information from the documents uploaded by the user"
                }
            },
            "required": ["user_query"],
            "additionalProperties": false
        }),
    )
}

/// Document retrieval tool backed by a [`RetrievalAgent`]
#[derive(Debug)]
pub struct RagAgentTool {
    agent: Arc<RetrievalAgent>,
    top_k: usize,
}

impl RagAgentTool {
    #[inline]
    pub fn new(agent: Arc<RetrievalAgent>) -> Self {
        Self {
            agent,
            top_k: DEFAULT_TOP_K,
        }
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }
}

#[async_trait]
impl ToolHandler for RagAgentTool {
    fn definition(&self) -> ToolDefinition {
        rag_agent_tool_definition()
    }

    async fn handle(&self, user_id: &str, arguments: &serde_json::Value) -> Result<String> {
        let user_query = arguments
            .get("user_query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing required parameter: user_query"))?;

        debug!("Retrieving for user {}: '{}'", user_id, user_query);
        let answer = self.agent.answer(user_query, user_id, self.top_k).await;
        Ok(answer.answer)
    }
}

/// Handlers keyed by function name
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry exposing only `rag_agent_tool`
    #[inline]
    pub fn with_retrieval(tool: RagAgentTool) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(tool));
        registry
    }

    /// Register a handler, replacing any with the same function name
    #[inline]
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.definition().function.name;
        if self.handlers.insert(name.clone(), handler).is_some() {
            warn!("Replaced existing handler for tool {}", name);
        }
    }

    /// Registered function names, sorted
    #[inline]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Declarations sent to the model, in name order
    #[inline]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.handlers.values().map(|h| h.definition()).collect();
        definitions.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        definitions
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Execute `call`, always yielding tool message content
    ///
    /// Unknown tools, malformed arguments and handler failures are reported to
    /// the model as a JSON `{"error": ...}` object.
    #[inline]
    pub async fn dispatch(&self, user_id: &str, call: &ToolCall) -> String {
        let name = &call.function.name;
        let Some(handler) = self.handlers.get(name) else {
            warn!("Model requested unknown tool {}", name);
            return json!({"error": format!("Unknown tool: {}", name)}).to_string();
        };

        let outcome = async {
            let arguments: serde_json::Value = serde_json::from_str(&call.function.arguments)
                .with_context(|| format!("invalid arguments {:?}", call.function.arguments))?;
            handler.handle(user_id, &arguments).await
        }
        .await;

        match outcome {
            Ok(content) => content,
            Err(e) => {
                error!("Tool {} failed for user {}: {:#}", name, user_id, e);
                json!({"error": format!("Error in {}: {:#}", name, e)}).to_string()
            }
        }
    }
}
