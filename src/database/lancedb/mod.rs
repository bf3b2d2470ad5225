// LanceDB vector database module
// Tenant resolution, stored record shapes and the document index capability


pub mod vector_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::config::Config;
use crate::{RagError, Result};

pub use vector_store::{StoreStatus, VectorStore};

/// One chunk returned by a similarity search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub text: String,
    /// Per-chunk metadata recorded at ingestion time
    pub metadata: serde_json::Value,
    pub file_name: String,
    pub file_type: String,
    pub chunk_index: i32,
    /// `1 - distance`; higher is more similar
    pub similarity_score: f32,
    pub distance: f32,
    pub created_at: DateTime<Utc>,
}

/// Row count and schema of a tenant table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableInfo {
    pub table_name: String,
    pub db_path: PathBuf,
    pub row_count: usize,
    pub schema: String,
}

impl TableInfo {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}

/// Chunk count for one ingested file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileSummary {
    pub file_name: String,
    pub file_type: String,
    pub chunk_count: usize,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesSummary {
    pub total_files: usize,
    pub total_chunks: usize,
    pub files: Vec<FileSummary>,
}

/// Chunk storage and similarity search over a single tenant's documents
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Store one record per chunk
    ///
    /// # Arguments
    /// * `chunks` - Chunk texts, in document order
    /// * `vectors` - One embedding per chunk; each is padded or truncated to the table dimension
    /// * `metadata` - One JSON object per chunk
    /// * `file_name` - Source file the chunks came from
    /// * `file_type` - Lowercase extension of the source file
    ///
    /// # Errors
    /// Returns a validation error if the three slices differ in length, or a
    /// database error if the store cannot be opened or written
    async fn insert(
        &self,
        chunks: &[String],
        vectors: &[Vec<f32>],
        metadata: &[serde_json::Value],
        file_name: &str,
        file_type: &str,
    ) -> Result<usize>;

    /// Nearest chunks by descending similarity
    ///
    /// # Arguments
    /// * `query_vector` - Query embedding; padded or truncated to the table dimension
    /// * `limit` - Maximum number of candidates
    /// * `similarity_threshold` - Minimum `1 - distance` kept; `0` disables filtering
    ///
    /// # Errors
    /// Returns a database error if the store cannot be opened or searched
    async fn search_similar(
        &self,
        query_vector: &[f32],
        limit: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchHit>>;

    /// Remove every chunk of `file_name`, returning how many were removed
    async fn delete_by_file(&self, file_name: &str) -> Result<usize>;

    async fn table_info(&self) -> Result<TableInfo>;

    async fn files_summary(&self) -> Result<FilesSummary>;
}

/// Resolves a tenant id to that tenant's isolated document index
pub trait TenantIndexes: Send + Sync {
    fn index_for(&self, user_id: &str) -> Result<Arc<dyn DocumentIndex>>;

    /// Storage location of the tenant's index
    fn tenant_path(&self, user_id: &str) -> Result<PathBuf>;

    /// Forget open handles after the storage root has been wiped
    fn evict_all(&self) {}
}

/// LanceDB-backed tenants rooted at `<base_dir>/vector_db/<user_id>`
///
/// One [`VectorStore`] is kept per tenant, so its connection and table handle
/// outlive a single request. Clones share the same handles.
#[derive(Debug, Clone)]
pub struct LanceTenants {
    root: PathBuf,
    table_name: String,
    dimension: usize,
    stores: Arc<Mutex<HashMap<String, Arc<VectorStore>>>>,
}

impl LanceTenants {
    #[inline]
    pub fn new(root: impl Into<PathBuf>, table_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            root: root.into(),
            table_name: table_name.into(),
            dimension,
            stores: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.vector_db_root(),
            config.search.table_name.clone(),
            config.openai.embedding_dimension as usize,
        )
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The tenant's store, opened lazily on first use and reused afterwards
    ///
    /// # Errors
    /// Returns a validation error if `user_id` is not a valid tenant id
    #[inline]
    pub fn store_for(&self, user_id: &str) -> Result<Arc<VectorStore>> {
        let path = self.tenant_path(user_id)?;
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let store = stores.entry(user_id.to_string()).or_insert_with(|| {
            debug!("Opening store for tenant {}", user_id);
            Arc::new(VectorStore::new(path, self.table_name.clone(), self.dimension))
        });
        Ok(Arc::clone(store))
    }

    /// Number of tenants with an open store
    #[inline]
    pub fn open_stores(&self) -> usize {
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl TenantIndexes for LanceTenants {
    fn index_for(&self, user_id: &str) -> Result<Arc<dyn DocumentIndex>> {
        let store: Arc<dyn DocumentIndex> = self.store_for(user_id)?;
        Ok(store)
    }

    fn tenant_path(&self, user_id: &str) -> Result<PathBuf> {
        validate_user_id(user_id)?;
        Ok(self.root.join(user_id))
    }

    fn evict_all(&self) {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Evicting {} open tenant stores", stores.len());
        stores.clear();
    }
}

/// Tenant ids become directory names, so only `[A-Za-z0-9_-]` is accepted
#[inline]
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(RagError::Validation("user_id cannot be empty".to_string()));
    }
    if user_id.len() > 128 {
        return Err(RagError::Validation(format!(
            "user_id is too long ({} characters, at most 128)",
            user_id.len()
        )));
    }
    if !user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(RagError::Validation(format!(
            "user_id '{}' may only contain letters, digits, '-' and '_'",
            user_id
        )));
    }
    Ok(())
}
