
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{EmbeddingProvider, normalize_dimension, zero_vector};
use crate::config::OpenAiConfig;
use crate::{RagError, Result};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_millis(1000);

/// Embedding client for any OpenAI-compatible `/embeddings` endpoint
#[derive(Clone)]
pub struct OpenAiEmbeddings {
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    batch_size: usize,
    client: reqwest::Client,
    request_timeout: Duration,
    retry_attempts: u32,
    backoff_unit: Duration,
}

impl std::fmt::Debug for OpenAiEmbeddings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddings")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Outcome of one failed HTTP attempt
#[derive(Debug)]
struct AttemptError {
    retryable: bool,
    message: String,
}

impl AttemptError {
    fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

impl OpenAiEmbeddings {
    /// Create an embedding client from the `openai` configuration section
    ///
    /// # Arguments
    /// * `config` - Supplies the base URL, API key, embedding model, dimension `D`,
    ///   batch size, retry budget and request timeout
    ///
    /// # Errors
    /// Returns [`RagError::Embedding`] if the HTTP client cannot be built
    #[inline]
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RagError::Embedding(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.api_base().to_string(),
            api_key: config.api_key.clone(),
            model: config.embedding_model.clone(),
            dimension: config.embedding_dimension as usize,
            batch_size: (config.batch_size as usize).max(1),
            client,
            request_timeout,
            retry_attempts: config.max_retries.max(1),
            backoff_unit: DEFAULT_BACKOFF_UNIT,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Total attempts per batch, including the first; at least one
    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Scale the exponential backoff between retries
    #[inline]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, AttemptError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| AttemptError::retryable("embedding request timed out"))?
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    AttemptError::retryable(format!("Transport error: {}", e))
                } else {
                    AttemptError::fatal(format!("Request error: {}", e))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(AttemptError::retryable(format!("Server returned HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(AttemptError::fatal(format!("Client error: HTTP {}", status)));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::fatal(format!("Failed to parse embedding response: {}", e)))?;

        if parsed.data.len() != texts.len() {
            return Err(AttemptError::fatal(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn embed_batch_with_retry(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, String> {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("Embedding request attempt {}/{}", attempt, self.retry_attempts);

            match self.embed_batch(texts).await {
                Ok(vectors) => {
                    debug!("Embedding request succeeded on attempt {}", attempt);
                    return Ok(vectors);
                }
                Err(error) if !error.retryable => {
                    warn!("Non-retryable embedding error: {}", error.message);
                    return Err(error.message);
                }
                Err(error) => {
                    warn!(
                        "Embedding error: {}, attempt {}/{}",
                        error.message, attempt, self.retry_attempts
                    );
                    last_error = Some(error.message);

                    if attempt < self.retry_attempts {
                        let delay = self.backoff_unit * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| "Request failed after retries".to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed_many(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut vectors = Vec::with_capacity(texts.len());
        let mut failed_batches = 0usize;

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            match self.embed_batch_with_retry(batch).await {
                Ok(batch_vectors) => {
                    vectors.extend(
                        batch_vectors
                            .into_iter()
                            .map(|v| normalize_dimension(v, self.dimension)),
                    );
                }
                Err(e) => {
                    error!(
                        "Embedding batch {} ({} texts) failed, substituting zero vectors: {}",
                        batch_index,
                        batch.len(),
                        e
                    );
                    failed_batches += 1;
                    vectors.extend(batch.iter().map(|_| zero_vector(self.dimension)));
                }
            }
        }

        if failed_batches > 0 {
            warn!(
                "{} of {} embedding batches degraded to zero vectors",
                failed_batches,
                texts.len().div_ceil(self.batch_size)
            );
        } else {
            info!("Generated {} embeddings", vectors.len());
        }

        vectors
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
