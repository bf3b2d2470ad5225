
mod memory;
mod redis;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::ConversationMessage;
use crate::Result;
use crate::config::RedisConfig;

pub use memory::InMemoryBackend;
pub use self::redis::RedisBackend;

/// Ordered string lists keyed by name, with bounded length and expiry
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Every entry of the list at `key`, oldest first; a missing key is an empty list
    async fn fetch(&self, key: &str) -> Result<Vec<String>>;

    /// Append `entries`, keep only the newest `max_len`, and reset expiry to `ttl`,
    /// all as one atomic step
    async fn append_bounded(
        &self,
        key: &str,
        entries: &[String],
        max_len: usize,
        ttl: Duration,
    ) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Per-user chat history. Every operation is best-effort: failures are logged and
/// reported as empty history or a no-op, never as errors.
#[derive(Clone)]
pub struct ConversationStore {
    backend: Arc<dyn ConversationBackend>,
    max_len: usize,
    ttl: Duration,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("backend", &self.backend.name())
            .field("max_len", &self.max_len)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ConversationStore {
    #[inline]
    pub fn new(backend: Arc<dyn ConversationBackend>, max_len: usize, ttl: Duration) -> Self {
        Self {
            backend,
            max_len: max_len.max(1),
            ttl,
        }
    }

    /// Redis when enabled, otherwise an in-process store
    #[inline]
    pub fn from_config(config: &RedisConfig) -> Result<Self> {
        let backend: Arc<dyn ConversationBackend> = if config.enabled {
            let url = config
                .connection_url()
                .map_err(|e| crate::RagError::Config(e.to_string()))?;
            Arc::new(RedisBackend::new(&url)?)
        } else {
            Arc::new(InMemoryBackend::new())
        };

        Ok(Self::new(
            backend,
            config.max_conversation_length,
            Duration::from_secs(config.conversation_ttl_secs),
        ))
    }

    #[inline]
    pub fn key_for(user_id: &str) -> String {
        format!("conversation:{}", user_id)
    }

    #[inline]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Stored history in order; unreadable entries are skipped
    #[inline]
    pub async fn get_history(&self, user_id: &str) -> Vec<ConversationMessage> {
        let key = Self::key_for(user_id);
        let entries = match self.backend.fetch(&key).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to load conversation for user {}: {}", user_id, e);
                return Vec::new();
            }
        };

        let total = entries.len();
        let messages: Vec<ConversationMessage> = entries
            .iter()
            .enumerate()
            .filter_map(|(position, entry)| match serde_json::from_str(entry) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(
                        "Skipping malformed conversation entry {} for user {}: {}",
                        position, user_id, e
                    );
                    None
                }
            })
            .collect();

        debug!(
            "Loaded {} of {} conversation entries for user {}",
            messages.len(),
            total,
            user_id
        );
        messages
    }

    #[inline]
    pub async fn append_one(&self, user_id: &str, message: &ConversationMessage) {
        self.append_many(user_id, std::slice::from_ref(message))
            .await;
    }

    #[inline]
    pub async fn append_many(&self, user_id: &str, messages: &[ConversationMessage]) {
        if messages.is_empty() {
            return;
        }

        let mut entries = Vec::with_capacity(messages.len());
        for message in messages {
            match serde_json::to_string(message) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping unserializable message for user {}: {}", user_id, e),
            }
        }

        let key = Self::key_for(user_id);
        if let Err(e) = self
            .backend
            .append_bounded(&key, &entries, self.max_len, self.ttl)
            .await
        {
            error!(
                "Failed to persist {} messages for user {}: {}",
                entries.len(),
                user_id,
                e
            );
        }
    }

    #[inline]
    pub async fn clear(&self, user_id: &str) {
        let key = Self::key_for(user_id);
        if let Err(e) = self.backend.remove(&key).await {
            error!("Failed to clear conversation for user {}: {}", user_id, e);
        }
    }
}
