// In-process doubles for the provider and storage seams, shared by unit tests

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::conversation::{ConversationMessage, FunctionCall, ToolCall};
use crate::database::lancedb::{
    DocumentIndex, FileSummary, FilesSummary, SearchHit, TableInfo, TenantIndexes,
    validate_user_id,
};
use crate::embeddings::EmbeddingProvider;
use crate::llm::{ChatCompletion, ChatProvider, ChatRequest, LlmError};
use crate::{RagError, Result};

/// Embeds every text as the first basis vector
pub struct FixedEmbeddings {
    dimension: usize,
    pub calls: AtomicUsize,
}

impl FixedEmbeddings {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbeddings {
    async fn embed_many(&self, texts: &[String]) -> Vec<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        texts
            .iter()
            .map(|_| {
                let mut v = vec![0.0; self.dimension];
                v[0] = 1.0;
                v
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Value,
    pub file_name: String,
    pub file_type: String,
    pub chunk_index: i32,
}

/// Vector index held in memory; search returns stored chunks in insertion order
#[derive(Default)]
pub struct MemoryIndex {
    pub chunks: Mutex<Vec<StoredChunk>>,
    /// Simulates an index that has rows but cannot find any of them
    pub blind_search: bool,
    pub search_delay: Option<Duration>,
    /// Thresholds passed to every search, in call order
    pub thresholds: Mutex<Vec<f32>>,
}

impl MemoryIndex {
    pub fn thresholds(&self) -> Vec<f32> {
        self.thresholds.lock().expect("lock should not be poisoned").clone()
    }

    pub fn chunks(&self) -> Vec<StoredChunk> {
        self.chunks.lock().expect("lock should not be poisoned").clone()
    }
}

#[async_trait]
impl DocumentIndex for MemoryIndex {
    async fn insert(
        &self,
        chunks: &[String],
        vectors: &[Vec<f32>],
        metadata: &[serde_json::Value],
        file_name: &str,
        file_type: &str,
    ) -> Result<usize> {
        if chunks.len() != vectors.len() || chunks.len() != metadata.len() {
            return Err(RagError::Validation("length mismatch".to_string()));
        }
        let mut stored = self.chunks.lock().expect("lock should not be poisoned");
        for (i, ((text, vector), meta)) in chunks.iter().zip(vectors).zip(metadata).enumerate() {
            stored.push(StoredChunk {
                text: text.clone(),
                vector: vector.clone(),
                metadata: meta.clone(),
                file_name: file_name.to_string(),
                file_type: file_type.to_string(),
                chunk_index: i32::try_from(i).expect("small index"),
            });
        }
        Ok(chunks.len())
    }

    async fn search_similar(
        &self,
        _query_vector: &[f32],
        limit: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        self.thresholds
            .lock()
            .expect("lock should not be poisoned")
            .push(similarity_threshold);
        if let Some(delay) = self.search_delay {
            tokio::time::sleep(delay).await;
        }
        if self.blind_search {
            return Ok(Vec::new());
        }
        Ok(self
            .chunks()
            .into_iter()
            .take(limit)
            .map(|chunk| SearchHit {
                text: chunk.text,
                metadata: chunk.metadata,
                file_name: chunk.file_name,
                file_type: chunk.file_type,
                chunk_index: chunk.chunk_index,
                similarity_score: 1.0,
                distance: 0.0,
                created_at: Utc::now(),
            })
            .collect())
    }

    async fn delete_by_file(&self, file_name: &str) -> Result<usize> {
        let mut stored = self.chunks.lock().expect("lock should not be poisoned");
        let before = stored.len();
        stored.retain(|c| c.file_name != file_name);
        Ok(before - stored.len())
    }

    async fn table_info(&self) -> Result<TableInfo> {
        Ok(TableInfo {
            table_name: "documents".to_string(),
            db_path: PathBuf::from("memory"),
            row_count: self.chunks().len(),
            schema: String::new(),
        })
    }

    async fn files_summary(&self) -> Result<FilesSummary> {
        let mut by_file: HashMap<String, FileSummary> = HashMap::new();
        for chunk in self.chunks() {
            by_file
                .entry(chunk.file_name.clone())
                .or_insert_with(|| FileSummary {
                    file_name: chunk.file_name.clone(),
                    file_type: chunk.file_type.clone(),
                    chunk_count: 0,
                    created_at: None,
                })
                .chunk_count += 1;
        }
        let mut files: Vec<FileSummary> = by_file.into_values().collect();
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(FilesSummary {
            total_files: files.len(),
            total_chunks: files.iter().map(|f| f.chunk_count).sum(),
            files,
        })
    }
}

/// Tenants backed by [`MemoryIndex`]es created on first use
#[derive(Default)]
pub struct MemoryTenants {
    pub indexes: Mutex<HashMap<String, Arc<MemoryIndex>>>,
}

impl MemoryTenants {
    pub fn with_index(user_id: &str, index: MemoryIndex) -> Self {
        let tenants = Self::default();
        tenants
            .indexes
            .lock()
            .expect("lock should not be poisoned")
            .insert(user_id.to_string(), Arc::new(index));
        tenants
    }

    pub fn index(&self, user_id: &str) -> Arc<MemoryIndex> {
        Arc::clone(
            self.indexes
                .lock()
                .expect("lock should not be poisoned")
                .entry(user_id.to_string())
                .or_default(),
        )
    }
}

impl TenantIndexes for MemoryTenants {
    fn index_for(&self, user_id: &str) -> Result<Arc<dyn DocumentIndex>> {
        validate_user_id(user_id)?;
        Ok(self.index(user_id))
    }

    fn tenant_path(&self, user_id: &str) -> Result<PathBuf> {
        validate_user_id(user_id)?;
        Ok(PathBuf::from("memory").join(user_id))
    }
}

/// Replays queued replies and records every request it receives
#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<std::result::Result<ChatCompletion, LlmError>>>,
    pub requests: Mutex<Vec<RecordedRequest>>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<ConversationMessage>,
    pub tool_names: Vec<String>,
    pub max_tokens: Option<u32>,
}

impl ScriptedChat {
    pub fn new(replies: Vec<std::result::Result<ChatCompletion, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .expect("lock should not be poisoned")
            .clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn complete(
        &self,
        request: ChatRequest<'_>,
    ) -> std::result::Result<ChatCompletion, LlmError> {
        self.requests
            .lock()
            .expect("lock should not be poisoned")
            .push(RecordedRequest {
                messages: request.messages.to_vec(),
                tool_names: request
                    .tools
                    .iter()
                    .map(|t| t.function.name.clone())
                    .collect(),
                max_tokens: request.max_tokens,
            });
        self.replies
            .lock()
            .expect("lock should not be poisoned")
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse { provider: "scripted" }))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        kind: "function".to_string(),
        function: FunctionCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        },
    }
}

pub fn calls_tools(calls: Vec<ToolCall>) -> ChatCompletion {
    ChatCompletion {
        content: String::new(),
        tool_calls: calls,
    }
}
