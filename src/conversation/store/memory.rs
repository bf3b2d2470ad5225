use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::ConversationBackend;
use crate::Result;

struct StoredList {
    entries: Vec<String>,
    expires_at: Instant,
}

/// Process-local lists with the same trim and expiry behaviour as the Redis backend
pub struct InMemoryBackend {
    lists: Mutex<HashMap<String, StoredList>>,
}

impl InMemoryBackend {
    #[inline]
    pub fn new() -> Self {
        Self {
            lists: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBackend {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl ConversationBackend for InMemoryBackend {
    async fn fetch(&self, key: &str) -> Result<Vec<String>> {
        let mut lists = self.lists.lock().await;
        let now = Instant::now();
        lists.retain(|_, list| list.expires_at > now);
        Ok(lists
            .get(key)
            .map(|list| list.entries.clone())
            .unwrap_or_default())
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

        let now = Instant::now();
        let mut lists = self.lists.lock().await;
        let list = lists.entry(key.to_string()).or_insert_with(|| StoredList {
            entries: Vec::new(),
            expires_at: now,
        });
        if list.expires_at <= now {
            list.entries.clear();
        }

        list.entries.extend_from_slice(entries);
        if list.entries.len() > max_len {
            let excess = list.entries.len() - max_len;
            list.entries.drain(..excess);
        }
        list.expires_at = now + ttl;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.lists.lock().await.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
