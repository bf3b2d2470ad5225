use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use super::ConversationBackend;
use crate::{RagError, Result};

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis lists, one per conversation key, sharing a lazily created connection manager
pub struct RedisBackend {
    client: redis::Client,
    manager: OnceCell<ConnectionManager>,
    operation_timeout: Duration,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    #[inline]
    pub fn new(url: &Url) -> Result<Self> {
        let client = redis::Client::open(url.as_str())
            .map_err(|e| RagError::Config(format!("Invalid Redis connection settings: {}", e)))?;

        Ok(Self {
            client,
            manager: OnceCell::new(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        })
    }

    #[inline]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.manager
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| RagError::Conversation(format!("Failed to connect to Redis: {}", e)))?;
                info!("Connected to Redis");
                Ok::<_, RagError>(manager)
            })
            .await
            .cloned()
    }

    /// Bound a Redis round trip by the operation timeout
    async fn timed<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.operation_timeout, future)
            .await
            .map_err(|_| RagError::Conversation(format!("Redis {} timed out", operation)))?
    }
}

#[async_trait]
impl ConversationBackend for RedisBackend {
    async fn fetch(&self, key: &str) -> Result<Vec<String>> {
        self.timed("LRANGE", async {
            let mut conn = self.connection().await?;
            let entries: Vec<String> = conn
                .lrange(key, 0, -1)
                .await
                .map_err(|e| RagError::Conversation(format!("Failed to read {}: {}", key, e)))?;
            debug!("Read {} entries from {}", entries.len(), key);
            Ok(entries)
        })
        .await
    }

    async fn append_bounded(
        &self,
        key: &str,
        entries: &[String],
        max_len: usize,
        ttl: Duration,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let keep = isize::try_from(max_len).unwrap_or(isize::MAX);
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

        self.timed("append pipeline", async {
            let mut conn = self.connection().await?;
            let _: () = redis::pipe()
                .atomic()
                .rpush(key, entries)
                .ignore()
                .ltrim(key, -keep, -1)
                .ignore()
                .expire(key, ttl_secs)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| RagError::Conversation(format!("Failed to append to {}: {}", key, e)))?;
            debug!("Appended {} entries to {}", entries.len(), key);
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.timed("DEL", async {
            let mut conn = self.connection().await?;
            let _: () = conn
                .del(key)
                .await
                .map_err(|e| RagError::Conversation(format!("Failed to delete {}: {}", key, e)))?;
            Ok(())
        })
        .await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
