
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;
pub const DEFAULT_TABLE_NAME: &str = "documents";
pub const VECTOR_DB_DIR: &str = "vector_db";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimension: u32,
    pub batch_size: u32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 32,
            request_timeout_secs: 60,
            max_retries: 3,
            temperature: 0.2,
            max_tokens: 2500,
        }
    }
}

// The API key never reaches logs or `config --show` output through Debug.
impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_dimension", &self.embedding_dimension)
            .field("batch_size", &self.batch_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub similarity_threshold: f32,
    pub timeout_secs: u64,
    pub table_name: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            similarity_threshold: 0.7,
            timeout_secs: 30,
            table_name: DEFAULT_TABLE_NAME.to_string(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedisConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub db: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub conversation_ttl_secs: u64,
    pub max_conversation_length: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            username: None,
            password: None,
            tls: false,
            conversation_ttl_secs: 86_400,
            max_conversation_length: 50,
        }
    }
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("username", &self.username)
            .field("password", &self.password.as_deref().map(redact))
            .field("tls", &self.tls)
            .field("conversation_ttl_secs", &self.conversation_ttl_secs)
            .field("max_conversation_length", &self.max_conversation_length)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleanupConfig {
    pub interval_seconds: u64,
    pub marker_file: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 86_400,
            marker_file: "README.md".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 2048)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 8192)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid chunk size: {0} (must be greater than 0)")]
    InvalidChunkSize(usize),
    #[error("Overlap size ({0}) must be smaller than chunk size ({1})")]
    InvalidOverlapSize(usize, usize),
    #[error("Invalid similarity threshold: {0} (must be between 0.0 and 1.0)")]
    InvalidSimilarityThreshold(f32),
    #[error("Invalid search limit: {0} (must be between 1 and 1000)")]
    InvalidSearchLimit(usize),
    #[error("Invalid timeout: {0} seconds (must be between 1 and 3600)")]
    InvalidTimeout(u64),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid conversation TTL: {0} (must be greater than 0)")]
    InvalidConversationTtl(u64),
    #[error("Invalid max conversation length: {0} (must be greater than 0)")]
    InvalidConversationLength(usize),
    #[error("Invalid cleanup interval: {0} (must be greater than 0)")]
    InvalidCleanupInterval(u64),
    #[error("Invalid table name: {0} (cannot be empty)")]
    InvalidTableName(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidEnvValue { name: String, value: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai: OpenAiConfig::default(),
            chunking: ChunkingConfig::default(),
            search: SearchConfig::default(),
            redis: RedisConfig::default(),
            cleanup: CleanupConfig::default(),
            server: ServerConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

impl Config {
    /// Load `config.toml` from `config_dir`, then apply process environment overrides
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        Self::load_with(config_dir, |name| std::env::var(name).ok())
    }

    /// Load `config.toml` from `config_dir`, taking overrides from `lookup`
    #[inline]
    pub fn load_with<P, F>(config_dir: P, lookup: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .apply_overrides(lookup)
            .context("Invalid environment override")?;
        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();
        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Apply environment-style overrides on top of file values
    #[inline]
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |name: &str, target: &mut String| {
            if let Some(value) = lookup(name) {
                *target = value;
            }
        };

        string("OPENAI_API_KEY", &mut self.openai.api_key);
        string("OPENAI_BASE_URL", &mut self.openai.base_url);
        string("OPENAI_CHAT_MODEL", &mut self.openai.chat_model);
        string("OPENAI_EMBEDDING_MODEL", &mut self.openai.embedding_model);
        parse_override(&lookup, "OPENAI_EMBEDDING_DIMENSION", &mut self.openai.embedding_dimension)?;
        parse_override(&lookup, "BATCH_SIZE", &mut self.openai.batch_size)?;

        parse_override(&lookup, "CHUNK_SIZE", &mut self.chunking.chunk_size)?;
        parse_override(&lookup, "OVERLAP_SIZE", &mut self.chunking.overlap_size)?;

        parse_override(&lookup, "SIMILARITY_THRESHOLD", &mut self.search.similarity_threshold)?;
        parse_override(&lookup, "DEFAULT_SEARCH_LIMIT", &mut self.search.default_limit)?;

        parse_bool_override(&lookup, "REDIS_ENABLED", &mut self.redis.enabled)?;
        string("REDIS_HOST", &mut self.redis.host);
        parse_override(&lookup, "REDIS_PORT", &mut self.redis.port)?;
        parse_override(&lookup, "REDIS_DB", &mut self.redis.db)?;
        if let Some(username) = lookup("REDIS_USERNAME") {
            self.redis.username = Some(username).filter(|u| !u.is_empty());
        }
        if let Some(password) = lookup("REDIS_PASSWORD") {
            self.redis.password = Some(password).filter(|p| !p.is_empty());
        }
        parse_bool_override(&lookup, "REDIS_TLS", &mut self.redis.tls)?;
        parse_override(&lookup, "CONVERSATION_TTL", &mut self.redis.conversation_ttl_secs)?;
        parse_override(
            &lookup,
            "MAX_CONVERSATION_LENGTH",
            &mut self.redis.max_conversation_length,
        )?;

        parse_override(&lookup, "VECTOR_DB_CLEANUP_INTERVAL", &mut self.cleanup.interval_seconds)?;

        string("SERVER_HOST", &mut self.server.host);
        parse_override(&lookup, "SERVER_PORT", &mut self.server.port)?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Root directory holding one vector database per tenant
    #[inline]
    pub fn vector_db_root(&self) -> PathBuf {
        self.get_base_dir().join(VECTOR_DB_DIR)
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.openai.validate()?;
        self.validate_chunking_config()?;
        self.search.validate()?;
        self.redis.validate()?;

        if self.cleanup.interval_seconds == 0 {
            return Err(ConfigError::InvalidCleanupInterval(
                self.cleanup.interval_seconds,
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if config.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if config.overlap_size >= config.chunk_size {
            return Err(ConfigError::InvalidOverlapSize(
                config.overlap_size,
                config.chunk_size,
            ));
        }

        Ok(())
    }
}

impl OpenAiConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }

        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.chat_model.clone()));
        }

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if !(1..=8192).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if self.batch_size == 0 || self.batch_size > 2048 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=3600).contains(&self.request_timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.request_timeout_secs));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        Ok(())
    }

    /// Base URL with any trailing slash removed, ready for path concatenation
    #[inline]
    pub fn api_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl SearchConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidSimilarityThreshold(
                self.similarity_threshold,
            ));
        }

        if !(1..=1000).contains(&self.default_limit) {
            return Err(ConfigError::InvalidSearchLimit(self.default_limit));
        }

        if !(1..=3600).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        if self.table_name.trim().is_empty() {
            return Err(ConfigError::InvalidTableName(self.table_name.clone()));
        }

        Ok(())
    }
}

impl RedisConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.conversation_ttl_secs == 0 {
            return Err(ConfigError::InvalidConversationTtl(
                self.conversation_ttl_secs,
            ));
        }

        if self.max_conversation_length == 0 {
            return Err(ConfigError::InvalidConversationLength(
                self.max_conversation_length,
            ));
        }

        self.connection_url().map(|_| ())
    }

    /// Build the `redis://` (or `rediss://` when TLS is on) connection URL
    #[inline]
    pub fn connection_url(&self) -> Result<Url, ConfigError> {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let raw = format!("{}://{}:{}/{}", scheme, self.host, self.port, self.db);
        let mut url = Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl(raw.clone()))?;

        if let Some(username) = self.username.as_deref() {
            url.set_username(username)
                .map_err(|()| ConfigError::InvalidUrl(raw.clone()))?;
        }
        if let Some(password) = self.password.as_deref() {
            url.set_password(Some(password))
                .map_err(|()| ConfigError::InvalidUrl(raw.clone()))?;
        }

        Ok(url)
    }
}

fn parse_override<T, F>(lookup: &F, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(name) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnvValue {
                name: name.to_string(),
                value,
            })?;
    }
    Ok(())
}

fn parse_bool_override<F>(lookup: &F, name: &str, target: &mut bool) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(name) {
        *target = match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(ConfigError::InvalidEnvValue {
                    name: name.to_string(),
                    value,
                });
            }
        };
    }
    Ok(())
}

/// Mask a secret, keeping only enough to recognise which key is configured
#[inline]
pub fn redact(secret: &str) -> String {
    if secret.is_empty() {
        return "<unset>".to_string();
    }
    if secret.chars().count() <= 8 {
        return "****".to_string();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", tail)
}
