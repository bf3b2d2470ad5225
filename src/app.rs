// Service wiring
// Builds every component from one validated `Config`

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::agent::{RagAgentTool, RetrievalAgent, ToolRegistry};
use crate::cleanup::CleanupScheduler;
use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::database::lancedb::{LanceTenants, TenantIndexes};
use crate::embeddings::{EmbeddingProvider, OpenAiEmbeddings, TextChunker};
use crate::ingestion::{DefaultExtractor, IngestionPipeline};
use crate::llm::{ChatProvider, OpenAiChat};
use crate::query_engine::QueryEngine;

/// Shared handles to the running components
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub tenants: Arc<dyn TenantIndexes>,
    pub agent: Arc<RetrievalAgent>,
    pub ingestion: Arc<IngestionPipeline>,
    pub engine: Arc<QueryEngine>,
    pub cleanup: Arc<CleanupScheduler>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("agent", &self.agent)
            .field("ingestion", &self.ingestion)
            .field("engine", &self.engine)
            .field("cleanup", &self.cleanup)
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Production wiring: OpenAI providers, LanceDB tenants and the configured conversation backend
    #[inline]
    pub fn from_config(config: Config) -> Result<Self> {
        let embeddings = OpenAiEmbeddings::new(&config.openai)
            .context("Failed to create embedding client")?;
        let chat = OpenAiChat::new(&config.openai).context("Failed to create chat client")?;
        let tenants = LanceTenants::from_config(&config);
        let conversations = ConversationStore::from_config(&config.redis)
            .context("Failed to create conversation store")?;

        info!(
            "Using chat model {} and embedding model {} (D = {}), conversations in {}",
            config.openai.chat_model,
            config.openai.embedding_model,
            config.openai.embedding_dimension,
            conversations.backend_name()
        );

        Ok(Self::with_components(
            config,
            Arc::new(embeddings),
            Arc::new(chat),
            Arc::new(tenants),
            conversations,
        ))
    }

    /// Wire the given providers and stores together
    #[inline]
    pub fn with_components(
        config: Config,
        embeddings: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatProvider>,
        tenants: Arc<dyn TenantIndexes>,
        conversations: ConversationStore,
    ) -> Self {
        let agent = Arc::new(
            RetrievalAgent::new(
                Arc::clone(&embeddings),
                Arc::clone(&tenants),
                Arc::clone(&chat),
            )
            .with_search_timeout(Duration::from_secs(config.search.timeout_secs))
            .with_similarity_threshold(config.search.similarity_threshold)
            .with_temperature(config.openai.temperature),
        );

        let tool = RagAgentTool::new(Arc::clone(&agent)).with_top_k(config.search.default_limit);
        let tools = Arc::new(ToolRegistry::with_retrieval(tool));

        let engine = QueryEngine::new(chat, tools, Arc::new(conversations))
            .with_temperature(config.openai.temperature)
            .with_max_tokens(config.openai.max_tokens);

        let ingestion = IngestionPipeline::new(
            Arc::new(DefaultExtractor),
            TextChunker::new(config.chunking.clone()),
            embeddings,
            Arc::clone(&tenants),
        );

        let cleanup = CleanupScheduler::from_config(&config).with_tenants(Arc::clone(&tenants));

        Self {
            config: Arc::new(config),
            tenants,
            agent,
            ingestion: Arc::new(ingestion),
            engine: Arc::new(engine),
            cleanup: Arc::new(cleanup),
        }
    }
}
