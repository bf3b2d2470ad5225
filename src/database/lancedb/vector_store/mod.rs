#[cfg(test)]
mod tests;

use super::{DocumentIndex, FileSummary, FilesSummary, SearchHit, TableInfo};
use crate::embeddings::normalize_dimension;
use crate::{RagError, Result};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatchIterator, StringArray,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use itertools::Itertools;
use lancedb::{
    Connection, Table,
    query::{ExecutableQuery, QueryBase, Select},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of a tenant store; every operation drives it to `TableReady` first
enum StoreState {
    Uninitialized,
    Connected(Connection),
    TableReady(Table),
}

/// Observable lifecycle stage of a [`VectorStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Uninitialized,
    Connected,
    TableReady,
}

/// One tenant's LanceDB database holding a single document table
pub struct VectorStore {
    db_path: PathBuf,
    table_name: String,
    dimension: usize,
    state: Mutex<StoreState>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("db_path", &self.db_path)
            .field("table_name", &self.table_name)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    /// Create a store for the database at `db_path`. Nothing is touched on disk
    /// until the first operation.
    ///
    /// # Arguments
    /// * `db_path` - Directory of the tenant's database
    /// * `table_name` - Name of the document table
    /// * `dimension` - Embedding dimension `D` of the `embedding` column
    #[inline]
    pub fn new(db_path: impl Into<PathBuf>, table_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            db_path: db_path.into(),
            table_name: table_name.into(),
            dimension,
            state: Mutex::new(StoreState::Uninitialized),
        }
    }

    /// Directory of the tenant's database
    #[inline]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Current lifecycle stage, without advancing it
    #[inline]
    pub async fn status(&self) -> StoreStatus {
        let state = self.state.lock().await;
        match &*state {
            StoreState::Uninitialized => StoreStatus::Uninitialized,
            StoreState::Connected(_) => StoreStatus::Connected,
            StoreState::TableReady(_) => StoreStatus::TableReady,
        }
    }

    /// Connect without preparing the table
    ///
    /// # Errors
    /// Returns a database error if the directory cannot be created or LanceDB
    /// refuses the connection
    #[inline]
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, StoreState::Uninitialized) {
            *state = StoreState::Connected(self.open_connection().await?);
        }
        Ok(())
    }

    /// Drive the state machine to `TableReady` and hand out the table
    ///
    /// Idempotent; every public operation starts here. An existing table must
    /// have been created with the same embedding dimension.
    async fn ensure_ready(&self) -> Result<Table> {
        let mut state = self.state.lock().await;
        loop {
            match &*state {
                StoreState::TableReady(table) => return Ok(table.clone()),
                StoreState::Uninitialized => {
                    let connection = self.open_connection().await?;
                    *state = StoreState::Connected(connection);
                }
                StoreState::Connected(connection) => {
                    let table = self.open_or_create_table(connection).await?;
                    *state = StoreState::TableReady(table);
                }
            }
        }
    }

    async fn open_connection(&self) -> Result<Connection> {
        debug!("Initializing LanceDB at path: {:?}", self.db_path);

        tokio::fs::create_dir_all(&self.db_path).await.map_err(|e| {
            RagError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", self.db_path.display());
        // the store is long-lived, so pick up writes made by other processes on every read
        lancedb::connect(&uri)
            .read_consistency_interval(Duration::ZERO)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to connect to LanceDB: {}", e)))
    }

    async fn open_or_create_table(&self, connection: &Connection) -> Result<Table> {
        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {}", e)))?;

        if table_names.contains(&self.table_name) {
            debug!("Documents table already exists, checking vector dimension");
            let table = self.open_table(connection).await?;
            self.check_dimension(&table).await?;
            return Ok(table);
        }

        info!(
            "Creating table '{}' with {} dimensions at {:?}",
            self.table_name, self.dimension, self.db_path
        );

        match connection
            .create_empty_table(&self.table_name, self.create_schema())
            .execute()
            .await
        {
            Ok(table) => Ok(table),
            Err(e) => {
                // Another request for the same tenant may have created it first
                warn!("Create table failed ({}), retrying as open", e);
                let table = self.open_table(connection).await?;
                self.check_dimension(&table).await?;
                Ok(table)
            }
        }
    }

    async fn open_table(&self, connection: &Connection) -> Result<Table> {
        connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {}", e)))
    }

    /// Reject tables created with a different embedding dimension
    async fn check_dimension(&self, table: &Table) -> Result<()> {
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

        let existing = schema
            .fields()
            .iter()
            .find(|field| field.name() == "embedding")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                RagError::Database("Could not find embedding column or determine dimension".to_string())
            })?;

        if existing != self.dimension {
            return Err(RagError::Database(format!(
                "Existing table at {:?} stores {}-dimensional embeddings, but {} are configured",
                self.db_path, existing, self.dimension
            )));
        }
        Ok(())
    }

    fn vector_field() -> Arc<Field> {
        Arc::new(Field::new("item", DataType::Float32, true))
    }

    /// Fixed storage schema of every tenant table
    fn create_schema(&self) -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(Self::vector_field(), self.dimension as i32),
                false,
            ),
            Field::new("metadata", DataType::Utf8, false),
            Field::new("file_name", DataType::Utf8, false),
            Field::new("file_type", DataType::Utf8, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new(
                "created_at",
                DataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
        ]))
    }

    fn create_record_batch(
        &self,
        chunks: &[String],
        vectors: &[Vec<f32>],
        metadata: &[serde_json::Value],
        file_name: &str,
        file_type: &str,
    ) -> Result<RecordBatch> {
        let len = chunks.len();
        let created_at = Utc::now().timestamp_micros();

        let ids: Vec<String> = (0..len).map(|_| Uuid::new_v4().to_string()).collect();
        let metadata_json: Vec<String> = metadata.iter().map(|m| m.to_string()).collect();
        let chunk_indices = (0..len)
            .map(|i| {
                i32::try_from(i).map_err(|_| {
                    RagError::Validation(format!("Chunk index {} does not fit in int32", i))
                })
            })
            .collect::<Result<Vec<i32>>>()?;

        let mut flat_values = Vec::with_capacity(len * self.dimension);
        for vector in vectors {
            flat_values.extend(normalize_dimension(vector.clone(), self.dimension));
        }
        let vector_array = FixedSizeListArray::try_new(
            Self::vector_field(),
            self.dimension as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| RagError::Database(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from_iter_values(chunks.iter())),
            Arc::new(vector_array),
            Arc::new(StringArray::from(metadata_json)),
            Arc::new(StringArray::from(vec![file_name; len])),
            Arc::new(StringArray::from(vec![file_type; len])),
            Arc::new(Int32Array::from(chunk_indices)),
            Arc::new(TimestampMicrosecondArray::from(vec![created_at; len])),
        ];

        RecordBatch::try_new(self.create_schema(), arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>> {
        let texts = column::<StringArray>(batch, "text")?;
        let metadata = column::<StringArray>(batch, "metadata")?;
        let file_names = column::<StringArray>(batch, "file_name")?;
        let file_types = column::<StringArray>(batch, "file_type")?;
        let chunk_indices = column::<Int32Array>(batch, "chunk_index")?;
        let created_ats = column::<TimestampMicrosecondArray>(batch, "created_at")?;
        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut hits = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            let metadata = serde_json::from_str(metadata.value(row)).unwrap_or_else(|e| {
                warn!("Stored metadata is not valid JSON: {}", e);
                serde_json::Value::Null
            });

            hits.push(SearchHit {
                text: texts.value(row).to_string(),
                metadata,
                file_name: file_names.value(row).to_string(),
                file_type: file_types.value(row).to_string(),
                chunk_index: chunk_indices.value(row),
                similarity_score: 1.0 - distance,
                distance,
                created_at: micros_to_datetime(created_ats.value(row)),
            });
        }

        Ok(hits)
    }

    /// Number of stored chunks
    ///
    /// # Errors
    /// Returns a database error if the table cannot be opened or counted
    #[inline]
    pub async fn count_rows(&self) -> Result<usize> {
        let table = self.ensure_ready().await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))
    }
}

#[async_trait]
impl DocumentIndex for VectorStore {
    async fn insert(
        &self,
        chunks: &[String],
        vectors: &[Vec<f32>],
        metadata: &[serde_json::Value],
        file_name: &str,
        file_type: &str,
    ) -> Result<usize> {
        if chunks.len() != vectors.len() || chunks.len() != metadata.len() {
            return Err(RagError::Validation(format!(
                "Length mismatch: {} chunks, {} vectors, {} metadata entries",
                chunks.len(),
                vectors.len(),
                metadata.len()
            )));
        }

        if chunks.is_empty() {
            debug!("No chunks to store");
            return Ok(0);
        }

        let table = self.ensure_ready().await?;
        let record_batch = self.create_record_batch(chunks, vectors, metadata, file_name, file_type)?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to insert chunks: {}", e)))?;

        info!(
            "Stored {} chunks of '{}' in {:?}",
            chunks.len(),
            file_name,
            self.db_path
        );
        Ok(chunks.len())
    }

    /// Similarity is reported as `1 - distance`, so an exact match scores `1.0`
    /// and a threshold of `1.0` keeps only exact matches.
    async fn search_similar(
        &self,
        query_vector: &[f32],
        limit: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        debug!(
            "Searching for similar vectors with limit {} and threshold {}",
            limit, similarity_threshold
        );

        if limit == 0 {
            return Ok(Vec::new());
        }

        let table = self.ensure_ready().await?;
        let query_vector = normalize_dimension(query_vector.to_vec(), self.dimension);

        let mut results = table
            .vector_search(query_vector.as_slice())
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column("embedding")
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            hits.extend(Self::parse_search_batch(&batch)?);
        }

        if similarity_threshold > 0.0 {
            hits.retain(|hit| hit.similarity_score >= similarity_threshold);
        }
        hits.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));

        debug!("Search returned {} results", hits.len());
        Ok(hits)
    }

    /// Matches `file_name` exactly; quotes in the name are escaped
    async fn delete_by_file(&self, file_name: &str) -> Result<usize> {
        debug!("Deleting chunks for file: {}", file_name);

        let table = self.ensure_ready().await?;
        let predicate = format!("file_name = '{}'", escape_literal(file_name));

        let before = table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;
        if before == 0 {
            return Ok(0);
        }

        table
            .delete(&predicate)
            .await
            .map_err(|e| RagError::Database(format!("Failed to delete file chunks: {}", e)))?;

        let after = table
            .count_rows(Some(predicate))
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;

        let removed = before.saturating_sub(after);
        info!("Deleted {} chunks for file: {}", removed, file_name);
        Ok(removed)
    }

    async fn table_info(&self) -> Result<TableInfo> {
        let table = self.ensure_ready().await?;

        let row_count = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

        Ok(TableInfo {
            table_name: self.table_name.clone(),
            db_path: self.db_path.clone(),
            row_count,
            schema: schema
                .fields()
                .iter()
                .map(|field| format!("{}: {}", field.name(), field.data_type()))
                .join(", "),
        })
    }

    /// Chunk counts grouped by file name, sorted by name. `created_at` is the
    /// newest insertion time of the file's chunks.
    async fn files_summary(&self) -> Result<FilesSummary> {
        let table = self.ensure_ready().await?;

        let total_chunks = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;
        if total_chunks == 0 {
            return Ok(FilesSummary::default());
        }

        let mut stream = table
            .query()
            .select(Select::columns(&["file_name", "file_type", "created_at"]))
            .limit(total_chunks)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to query files: {}", e)))?;

        let mut rows: Vec<(String, String, DateTime<Utc>)> = Vec::with_capacity(total_chunks);
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            let file_names = column::<StringArray>(&batch, "file_name")?;
            let file_types = column::<StringArray>(&batch, "file_type")?;
            let created_ats = column::<TimestampMicrosecondArray>(&batch, "created_at")?;
            for row in 0..batch.num_rows() {
                rows.push((
                    file_names.value(row).to_string(),
                    file_types.value(row).to_string(),
                    micros_to_datetime(created_ats.value(row)),
                ));
            }
        }

        let files: Vec<FileSummary> = rows
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .chunk_by(|row| row.0.clone())
            .into_iter()
            .map(|(file_name, group)| {
                let group: Vec<_> = group.collect();
                FileSummary {
                    file_type: group.first().map(|row| row.1.clone()).unwrap_or_default(),
                    chunk_count: group.len(),
                    created_at: group.iter().map(|row| row.2).max(),
                    file_name,
                }
            })
            .collect();

        Ok(FilesSummary {
            total_files: files.len(),
            total_chunks,
            files,
        })
    }
}

/// Downcast a named column, reporting a missing or mistyped column as a database error
fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

/// Quote a value for use inside a single-quoted SQL string literal
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}
