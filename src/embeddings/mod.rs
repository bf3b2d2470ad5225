// Embeddings module
// Text chunking and the embedding provider capability

pub mod chunking;
pub mod openai;


use async_trait::async_trait;
use tracing::warn;

pub use chunking::{ChunkingConfig, TextChunker, chunk_text};
pub use openai::OpenAiEmbeddings;

/// Produces fixed-dimension embedding vectors for text
///
/// Implementations are fail-open: a batch that cannot be embedded yields zero
/// vectors of [`EmbeddingProvider::dimension`] entries instead of an error, so the
/// returned sequence always has one vector per input text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed every text, batching requests internally
    async fn embed_many(&self, texts: &[String]) -> Vec<Vec<f32>>;

    /// Embed a single text
    async fn embed_one(&self, text: &str) -> Vec<f32> {
        self.embed_many(&[text.to_string()])
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| vec![0.0; self.dimension()])
    }

    /// Dimension `D` of every returned vector
    fn dimension(&self) -> usize;
}

/// Pad with zeros or truncate so the vector has exactly `dimension` entries
#[inline]
pub fn normalize_dimension(mut vector: Vec<f32>, dimension: usize) -> Vec<f32> {
    if vector.len() > dimension {
        warn!(
            "Truncating embedding from {} to {} dimensions",
            vector.len(),
            dimension
        );
        vector.truncate(dimension);
    } else if vector.len() < dimension {
        vector.resize(dimension, 0.0);
    }
    vector
}

/// A zero vector standing in for an embedding that could not be produced
#[inline]
pub fn zero_vector(dimension: usize) -> Vec<f32> {
    vec![0.0; dimension]
}
