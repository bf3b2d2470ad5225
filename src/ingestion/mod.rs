// Ingestion module
// Upload normalization, text extraction and the extract -> chunk -> embed -> store pipeline

pub mod extract;


use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::database::lancedb::TenantIndexes;
use crate::embeddings::{EmbeddingProvider, TextChunker};
use crate::{RagError, Result};

pub use extract::{DefaultExtractor, TextExtractor};

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "docx", "txt"];

const NO_TEXT_MESSAGE: &str = "No text could be extracted from the document";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
}

impl FileType {
    /// Detect the type from a file name's extension, case-insensitively
    #[inline]
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        match extension_of(file_name).as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" => Ok(Self::Txt),
            other => Err(RagError::Validation(format!(
                "Unsupported file type '{}'. Supported types: {}",
                other,
                SUPPORTED_EXTENSIONS.join(", ")
            ))),
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Txt => "txt",
        }
    }
}

impl fmt::Display for FileType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// A document to ingest: its name and raw bytes, from an HTTP upload or a local file
#[derive(Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    file_name: String,
    bytes: Vec<u8>,
}

impl fmt::Debug for DocumentUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentUpload")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl DocumentUpload {
    #[inline]
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a local file, named by its final path component
    #[inline]
    pub async fn from_path(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                RagError::Validation(format!("Path has no usable file name: {}", path.display()))
            })?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(file_name, bytes))
    }

    #[inline]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn file_type(&self) -> Result<FileType> {
        FileType::from_file_name(&self.file_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Success,
    Error,
}

/// Outcome of ingesting one document; failures carry `chunks_processed == 0`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionResult {
    pub status: IngestionStatus,
    pub message: String,
    pub user_id: String,
    pub db_path: String,
    pub chunks_processed: usize,
    pub file_name: String,
    pub file_type: String,
}

impl IngestionResult {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == IngestionStatus::Success
    }
}

pub struct IngestionPipeline {
    extractor: Arc<dyn TextExtractor>,
    chunker: TextChunker,
    embeddings: Arc<dyn EmbeddingProvider>,
    tenants: Arc<dyn TenantIndexes>,
}

impl fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("chunker", &self.chunker)
            .field("dimension", &self.embeddings.dimension())
            .finish_non_exhaustive()
    }
}

impl IngestionPipeline {
    #[inline]
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        chunker: TextChunker,
        embeddings: Arc<dyn EmbeddingProvider>,
        tenants: Arc<dyn TenantIndexes>,
    ) -> Self {
        Self {
            extractor,
            chunker,
            embeddings,
            tenants,
        }
    }

    /// Index `upload` into `user_id`'s store, replacing any earlier copy of the same file
    ///
    /// Never fails: errors are logged and reported in the returned result.
    #[inline]
    pub async fn process_document(&self, upload: &DocumentUpload, user_id: &str) -> IngestionResult {
        let db_path = self
            .tenants
            .tenant_path(user_id)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let mut result = IngestionResult {
            status: IngestionStatus::Error,
            message: String::new(),
            user_id: user_id.to_string(),
            db_path,
            chunks_processed: 0,
            file_name: upload.file_name().to_string(),
            file_type: extension_of(upload.file_name()),
        };

        match self.ingest(upload, user_id).await {
            Ok(chunks) => {
                info!(
                    "Ingested {} ({} chunks) for user {}",
                    upload.file_name(),
                    chunks,
                    user_id
                );
                result.status = IngestionStatus::Success;
                result.message = format!("Document '{}' processed successfully", upload.file_name());
                result.chunks_processed = chunks;
            }
            Err(e) => {
                error!(
                    "Failed to ingest {} for user {}: {}",
                    upload.file_name(),
                    user_id,
                    e
                );
                result.message = e.to_string();
            }
        }
        result
    }

    async fn ingest(&self, upload: &DocumentUpload, user_id: &str) -> Result<usize> {
        let index = self.tenants.index_for(user_id)?;
        let file_type = upload.file_type()?;

        let text = self.extractor.extract(upload).await?;
        if text.trim().is_empty() {
            return Err(RagError::Extraction(NO_TEXT_MESSAGE.to_string()));
        }

        let chunks = self.chunker.chunk(&text);
        if chunks.is_empty() {
            return Err(RagError::Extraction(NO_TEXT_MESSAGE.to_string()));
        }
        debug!("Split {} into {} chunks", upload.file_name(), chunks.len());

        let vectors = self.embeddings.embed_many(&chunks).await;
        if vectors.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let metadata = chunk_metadata(&chunks, user_id);

        let removed = index.delete_by_file(upload.file_name()).await?;
        if removed > 0 {
            info!(
                "Replaced {} existing chunks of {} for user {}",
                removed,
                upload.file_name(),
                user_id
            );
        }

        index
            .insert(
                &chunks,
                &vectors,
                &metadata,
                upload.file_name(),
                file_type.as_str(),
            )
            .await
    }
}

/// Per-chunk metadata stored alongside each record
#[inline]
pub fn chunk_metadata(chunks: &[String], user_id: &str) -> Vec<serde_json::Value> {
    let timestamp = Utc::now().to_rfc3339();
    chunks
        .iter()
        .enumerate()
        .map(|(chunk_index, chunk)| {
            json!({
                "chunk_index": chunk_index,
                "user_id": user_id,
                "chunk_length": chunk.chars().count(),
                "total_chunks": chunks.len(),
                "processing_timestamp": timestamp,
            })
        })
        .collect()
}

/// Supported documents in `path`: the file itself, or the directory's files sorted by name
#[inline]
pub async fn collect_documents(path: &Path) -> Result<Vec<std::path::PathBuf>> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_dir() {
        FileType::from_file_name(&path.to_string_lossy())?;
        return Ok(vec![path.to_path_buf()]);
    }

    let mut documents = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let entry_path = entry.path();
        if !entry.file_type().await?.is_dir()
            && FileType::from_file_name(&entry_path.to_string_lossy()).is_ok()
        {
            documents.push(entry_path);
        }
    }
    documents.sort();
    Ok(documents)
}
