// Retrieval agent module
// Answers a question from a tenant's most similar document chunks

pub mod tools;


use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::RagError;
use crate::conversation::ConversationMessage;
use crate::database::lancedb::{SearchHit, TenantIndexes};
use crate::embeddings::EmbeddingProvider;
use crate::llm::{ChatProvider, ChatRequest, LlmError};

pub use tools::{RAG_AGENT_TOOL, RagAgentTool, ToolHandler, ToolRegistry, rag_agent_tool_definition};

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

const RETRIEVAL_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions using the provided document excerpts.\n\
Use only the content in the context to answer the user. If the answer is not contained, say so.";

const NO_DOCUMENTS_ANSWER: &str =
    "I'm sorry, I couldn't find any uploaded documents. Please upload some documents first.";
const NO_RESULTS_ANSWER: &str =
    "I'm sorry, I couldn't find anything relevant in your documents. There might be a technical issue.";
const FAILURE_ANSWER: &str = "I encountered an error while processing your request.";

/// Why a retrieval turn could not produce an answer
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("No documents found in your vector database. Please upload some documents first.")]
    NoDocuments,

    #[error(
        "No documents found in your vector database, even without similarity filtering. There might be a technical issue."
    )]
    NoRelevantResults,

    #[error("vector store error: {0}")]
    Store(#[from] RagError),

    #[error("vector search timed out after {0:?}")]
    Timeout(Duration),

    #[error("chat completion failed: {0}")]
    Llm(#[from] LlmError),
}

impl RetrievalError {
    /// Text shown to the user in place of an answer
    #[inline]
    pub fn apology(&self) -> &'static str {
        match self {
            Self::NoDocuments => NO_DOCUMENTS_ANSWER,
            Self::NoRelevantResults => NO_RESULTS_ANSWER,
            Self::Store(_) | Self::Timeout(_) | Self::Llm(_) => FAILURE_ANSWER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Success,
    Error,
}

/// Outcome of one retrieval turn; failures carry an apology in `answer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAnswer {
    pub status: AgentStatus,
    pub message: String,
    pub user_id: String,
    pub query: String,
    pub answer: String,
}

impl AgentAnswer {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }
}

pub struct RetrievalAgent {
    embeddings: Arc<dyn EmbeddingProvider>,
    tenants: Arc<dyn TenantIndexes>,
    chat: Arc<dyn ChatProvider>,
    search_timeout: Duration,
    similarity_threshold: f32,
    temperature: f32,
}

impl std::fmt::Debug for RetrievalAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalAgent")
            .field("chat_model", &self.chat.model())
            .field("search_timeout", &self.search_timeout)
            .field("similarity_threshold", &self.similarity_threshold)
            .finish_non_exhaustive()
    }
}

impl RetrievalAgent {
    #[inline]
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        tenants: Arc<dyn TenantIndexes>,
        chat: Arc<dyn ChatProvider>,
    ) -> Self {
        Self {
            embeddings,
            tenants,
            chat,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            temperature: 0.2,
        }
    }

    #[inline]
    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    /// Default minimum similarity for [`RetrievalAgent::search`]
    #[inline]
    pub fn with_similarity_threshold(mut self, similarity_threshold: f32) -> Self {
        self.similarity_threshold = similarity_threshold;
        self
    }

    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[inline]
    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    /// Chunks of `user_id`'s documents similar to `query`, without generating an answer
    ///
    /// # Arguments
    /// * `query` - Text to embed and search for
    /// * `user_id` - Tenant whose documents are searched
    /// * `limit` - Maximum number of hits
    /// * `similarity_threshold` - Minimum similarity kept; `None` uses the configured default
    ///
    /// # Errors
    /// Returns a validation error for an invalid tenant id, or a database error
    /// if the search fails or exceeds the search timeout
    #[inline]
    pub async fn search(
        &self,
        query: &str,
        user_id: &str,
        limit: usize,
        similarity_threshold: Option<f32>,
    ) -> crate::Result<Vec<SearchHit>> {
        let index = self.tenants.index_for(user_id)?;
        let threshold = similarity_threshold.unwrap_or(self.similarity_threshold);

        let query_vector = self.embeddings.embed_one(query).await;
        let hits = tokio::time::timeout(
            self.search_timeout,
            index.search_similar(&query_vector, limit, threshold),
        )
        .await
        .map_err(|_| {
            RagError::Database(format!(
                "Vector search timed out after {:?}",
                self.search_timeout
            ))
        })??;

        info!(
            "Search for user {} returned {} hits at threshold {}",
            user_id,
            hits.len(),
            threshold
        );
        Ok(hits)
    }

    /// Answer `user_query` from the `top_k` chunks of `user_id`'s documents closest to it
    ///
    /// Never fails: every error is logged and turned into an `Error` answer
    /// whose text tells the user what went wrong.
    #[inline]
    pub async fn answer(&self, user_query: &str, user_id: &str, top_k: usize) -> AgentAnswer {
        match self.retrieve_and_answer(user_query, user_id, top_k).await {
            Ok((answer, chunks)) => {
                info!(
                    "Answered query for user {} from {} chunks",
                    user_id, chunks
                );
                AgentAnswer {
                    status: AgentStatus::Success,
                    message: "Answer generated successfully".to_string(),
                    user_id: user_id.to_string(),
                    query: user_query.to_string(),
                    answer,
                }
            }
            Err(e) => {
                match &e {
                    RetrievalError::NoDocuments | RetrievalError::NoRelevantResults => {
                        warn!("Retrieval for user {} found nothing: {}", user_id, e);
                    }
                    _ => error!("Retrieval for user {} failed: {}", user_id, e),
                }
                AgentAnswer {
                    status: AgentStatus::Error,
                    message: e.to_string(),
                    user_id: user_id.to_string(),
                    query: user_query.to_string(),
                    answer: e.apology().to_string(),
                }
            }
        }
    }

    async fn retrieve_and_answer(
        &self,
        user_query: &str,
        user_id: &str,
        top_k: usize,
    ) -> Result<(String, usize), RetrievalError> {
        let query_vector = self.embeddings.embed_one(user_query).await;
        let hits = self.retrieve(&query_vector, user_id, top_k).await?;

        let context = build_context(&hits);
        let messages = [
            ConversationMessage::system(RETRIEVAL_SYSTEM_PROMPT),
            ConversationMessage::user(build_user_prompt(user_query, &context)),
        ];

        debug!("Calling chat completion for user {}", user_id);
        let completion = self
            .chat
            .complete(ChatRequest::new(&messages).with_temperature(self.temperature))
            .await?;

        Ok((completion.content, hits.len()))
    }

    async fn retrieve(
        &self,
        query_vector: &[f32],
        user_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        let index = self.tenants.index_for(user_id)?;

        let info = index.table_info().await?;
        debug!("Table for user {} has {} rows", user_id, info.row_count);
        if info.is_empty() {
            return Err(RetrievalError::NoDocuments);
        }

        // Threshold 0: the model, not the store, judges relevance
        let hits = tokio::time::timeout(
            self.search_timeout,
            index.search_similar(query_vector, top_k.max(1), 0.0),
        )
        .await
        .map_err(|_| RetrievalError::Timeout(self.search_timeout))??;

        if hits.is_empty() {
            return Err(RetrievalError::NoRelevantResults);
        }

        for (rank, hit) in hits.iter().enumerate() {
            debug!(
                "Hit {} for user {}: {} chunk {} (similarity {:.4})",
                rank + 1,
                user_id,
                hit.file_name,
                hit.chunk_index,
                hit.similarity_score
            );
        }
        Ok(hits)
    }
}

/// One `---` block per chunk, tagged with its file and chunk index
#[inline]
pub fn build_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "---\nFile: {}, Chunk: {}\n{}",
                hit.file_name, hit.chunk_index, hit.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_user_prompt(user_query: &str, context: &str) -> String {
    format!(
        "User Query: {}\n\nContext:\n{}\n\nPlease answer the question based on the above context.",
        user_query, context
    )
}
