use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::RagError;
use crate::app::Services;
use crate::cleanup::{CleanupOutcome, CleanupReport, CleanupStatus};
use crate::database::{FilesSummary, SearchHit, validate_user_id};
use crate::ingestion::{DocumentUpload, IngestionResult};

const UPLOAD_FIELD: &str = "file";

/// Error body `{"detail": ...}` with its status code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    #[inline]
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    #[inline]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<RagError> for ApiError {
    #[inline]
    fn from(e: RagError) -> Self {
        match e {
            RagError::Validation(_) => Self::bad_request(e.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    #[inline]
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatParams {
    query: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchParams {
    query: String,
    limit: Option<usize>,
    threshold: Option<f32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SearchResults {
    user_id: String,
    query: String,
    similarity_threshold: f32,
    total_results: usize,
    results: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeletedDocument {
    status: &'static str,
    user_id: String,
    file_name: String,
    deleted_chunks: usize,
}

pub(crate) async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "Welcome to the DocuChat API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "API for document processing, embedding generation, and RAG querying",
        "endpoints": [
            {"path": "/upload-document/{user_id}", "method": "POST", "description": "Upload a document for processing"},
            {"path": "/chat/{user_id}", "method": "POST", "description": "Ask a question about your documents"},
            {"path": "/chat/{user_id}", "method": "DELETE", "description": "Clear your conversation"},
            {"path": "/search/{user_id}", "method": "GET", "description": "Find the chunks most similar to a query"},
            {"path": "/documents/{user_id}", "method": "GET", "description": "List ingested documents"},
            {"path": "/documents/{user_id}/{file_name}", "method": "DELETE", "description": "Remove a document"},
            {"path": "/api/cleanup/vector-db", "method": "POST", "description": "Wipe all tenant stores now"},
            {"path": "/api/cleanup/status", "method": "GET", "description": "Cleanup schedule and storage status"},
            {"path": "/health", "method": "GET", "description": "Check the health of the API"}
        ]
    }))
}

pub(crate) async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn upload_document(
    State(services): State<Services>,
    Path(user_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<IngestionResult>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("Uploaded file has no file name"))?;
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some(DocumentUpload::new(file_name, bytes.to_vec()));
        break;
    }
    let upload = upload
        .ok_or_else(|| ApiError::bad_request(format!("Missing multipart field '{}'", UPLOAD_FIELD)))?;

    info!(
        "Upload of {} ({} bytes) for user {}",
        upload.file_name(),
        upload.bytes().len(),
        user_id
    );
    let result = services.ingestion.process_document(&upload, &user_id).await;
    if result.is_success() {
        Ok(Json(result))
    } else {
        Err(ApiError::internal(result.message))
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    warn!("Rejected multipart upload: {}", e);
    ApiError {
        status: e.status(),
        detail: e.body_text(),
    }
}

pub(crate) async fn chat(
    State(services): State<Services>,
    Path(user_id): Path<String>,
    Query(params): Query<ChatParams>,
) -> Result<Json<String>, ApiError> {
    validate_user_id(&user_id)?;
    if params.query.trim().is_empty() {
        return Err(ApiError::bad_request("query cannot be empty"));
    }

    services
        .engine
        .chat(&params.query, &user_id)
        .await
        .map(Json)
        .map_err(|failure| ApiError::internal(failure.to_string()))
}

pub(crate) async fn clear_chat(
    State(services): State<Services>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_user_id(&user_id)?;
    services.engine.clear_history(&user_id).await;
    Ok(Json(json!({
        "status": "success",
        "message": "Conversation cleared",
        "user_id": user_id,
    })))
}

pub(crate) async fn search_documents(
    State(services): State<Services>,
    Path(user_id): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResults>, ApiError> {
    validate_user_id(&user_id)?;
    if params.query.trim().is_empty() {
        return Err(ApiError::bad_request("query cannot be empty"));
    }
    if params
        .threshold
        .is_some_and(|threshold| !(0.0..=1.0).contains(&threshold))
    {
        return Err(ApiError::bad_request("threshold must be between 0 and 1"));
    }
    let limit = params.limit.unwrap_or(services.config.search.default_limit);
    if !(1..=1000).contains(&limit) {
        return Err(ApiError::bad_request("limit must be between 1 and 1000"));
    }

    let similarity_threshold = params
        .threshold
        .unwrap_or_else(|| services.agent.similarity_threshold());
    let results = services
        .agent
        .search(&params.query, &user_id, limit, Some(similarity_threshold))
        .await?;

    Ok(Json(SearchResults {
        user_id,
        query: params.query,
        similarity_threshold,
        total_results: results.len(),
        results,
    }))
}

pub(crate) async fn list_documents(
    State(services): State<Services>,
    Path(user_id): Path<String>,
) -> Result<Json<FilesSummary>, ApiError> {
    let index = services.tenants.index_for(&user_id)?;
    Ok(Json(index.files_summary().await?))
}

pub(crate) async fn delete_document(
    State(services): State<Services>,
    Path((user_id, file_name)): Path<(String, String)>,
) -> Result<Json<DeletedDocument>, ApiError> {
    let index = services.tenants.index_for(&user_id)?;
    let deleted_chunks = index.delete_by_file(&file_name).await?;
    info!(
        "Deleted {} chunks of {} for user {}",
        deleted_chunks, file_name, user_id
    );
    Ok(Json(DeletedDocument {
        status: "success",
        user_id,
        file_name,
        deleted_chunks,
    }))
}

pub(crate) async fn run_cleanup(
    State(services): State<Services>,
) -> Result<Json<CleanupReport>, ApiError> {
    let report = services.cleanup.run_once().await;
    match report.status {
        CleanupOutcome::Success => Ok(Json(report)),
        CleanupOutcome::Error => Err(ApiError::internal(report.message)),
    }
}

pub(crate) async fn cleanup_status(State(services): State<Services>) -> Json<CleanupStatus> {
    Json(services.cleanup.status().await)
}
