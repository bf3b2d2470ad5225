// Query engine module
// One chat turn: history, tool-calling completion, concurrent tool execution, persistence

#[cfg(test)]
mod tests;

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::agent::ToolRegistry;
use crate::conversation::{ConversationMessage, ConversationStore, Role};
use crate::llm::{ChatFailure, ChatProvider, ChatRequest, LlmError};

pub const SYSTEM_PROMPT: &str = "\
[IDENTITY]
You are an AI assistant specialized in answering questions based on user-uploaded documents.
You provide precise, context-aware, and relevant answers using only the content contained in the documents.

[TASK]
Based on the user's query and the uploaded documents, decide how to respond:
- Retrieve relevant information from the document chunks.
- If the answer cannot be found in the documents, inform the user politely.

[INSTRUCTIONS]
- Use the rag_agent_tool to retrieve relevant information from user's uploaded documents
- Provide accurate, concise, and context-aware responses based on document content
- If information is not present in the documents, politely inform the user
- Keep replies clear, helpful, and focused on the user's query
- Cite specific document names and sections when relevant

[STYLE]
- Use markdown formatting (bold, italic, lists, tables, code blocks)
- Keep responses clear and well-structured
";

const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_MAX_TOKENS: u32 = 2500;

pub struct QueryEngine {
    chat: Arc<dyn ChatProvider>,
    tools: Arc<ToolRegistry>,
    conversations: Arc<ConversationStore>,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("model", &self.chat.model())
            .field("tools", &self.tools)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl QueryEngine {
    #[inline]
    pub fn new(
        chat: Arc<dyn ChatProvider>,
        tools: Arc<ToolRegistry>,
        conversations: Arc<ConversationStore>,
    ) -> Self {
        Self {
            chat,
            tools,
            conversations,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[inline]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[inline]
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Answer `user_query` in the context of `user_id`'s conversation
    ///
    /// Only this turn's messages are appended to the stored history, and only
    /// when the turn succeeds.
    #[inline]
    pub async fn chat(&self, user_query: &str, user_id: &str) -> Result<String, ChatFailure> {
        self.run_turn(user_query, user_id).await.map_err(|e| {
            let failure = ChatFailure::from(&e);
            error!(
                "Chat turn for user {} failed ({}): {}",
                user_id,
                failure.category(),
                e
            );
            failure
        })
    }

    /// Forget `user_id`'s conversation
    #[inline]
    pub async fn clear_history(&self, user_id: &str) {
        self.conversations.clear(user_id).await;
        info!("Cleared conversation for user {}", user_id);
    }

    async fn run_turn(&self, user_query: &str, user_id: &str) -> Result<String, LlmError> {
        let mut history = drop_orphaned_tool_results(self.conversations.get_history(user_id).await);
        if !history.iter().any(|m| m.role == Role::System) {
            history.insert(0, ConversationMessage::system(SYSTEM_PROMPT));
        }

        let persisted_from = history.len();
        history.push(ConversationMessage::user(user_query));

        let tools = self.tools.definitions();
        let first = self
            .chat
            .complete(self.request(&history).with_tools(&tools))
            .await?;

        let answer = if first.wants_tools() {
            info!(
                "Executing {} tool calls for user {}",
                first.tool_calls.len(),
                user_id
            );

            // join_all yields outputs in request order regardless of completion order
            let outputs = join_all(
                first
                    .tool_calls
                    .iter()
                    .map(|call| self.tools.dispatch(user_id, call)),
            )
            .await;

            for (call, output) in first.tool_calls.iter().zip(outputs) {
                history.push(ConversationMessage::tool_announcement(call));
                history.push(ConversationMessage::tool_result(call.id.clone(), output));
            }

            self.chat.complete(self.request(&history)).await?.content
        } else {
            debug!("No tool calls requested, answering directly");
            first.content
        };

        history.push(ConversationMessage::assistant(answer.clone()));

        let new_messages = history.get(persisted_from..).unwrap_or_default();
        self.conversations.append_many(user_id, new_messages).await;
        debug!(
            "Persisted {} new messages for user {}",
            new_messages.len(),
            user_id
        );

        Ok(answer)
    }

    fn request<'a>(&self, messages: &'a [ConversationMessage]) -> ChatRequest<'a> {
        ChatRequest::new(messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

/// Drop tool results at the head of a trimmed history whose announcing message was trimmed away
#[inline]
pub fn drop_orphaned_tool_results(history: Vec<ConversationMessage>) -> Vec<ConversationMessage> {
    let orphans = history
        .iter()
        .take_while(|m| m.role == Role::Tool)
        .count();
    if orphans > 0 {
        debug!("Dropping {} orphaned tool messages", orphans);
    }
    history.into_iter().skip(orphans).collect()
}
