use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Conversation store error: {0}")]
    Conversation(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod agent;
pub mod app;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod database;
pub mod embeddings;
pub mod ingestion;
pub mod llm;
pub mod query_engine;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;
