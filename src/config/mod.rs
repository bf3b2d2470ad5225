// Configuration management module
// TOML settings file, environment overrides and the `config --show` view

pub mod settings;


use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;

pub use settings::{
    CleanupConfig, Config, ConfigError, OpenAiConfig, RedisConfig, SearchConfig, ServerConfig,
    redact,
};

/// Environment variable that relocates the application home directory
pub const HOME_ENV: &str = "DOCUCHAT_HOME";

/// Resolve the base directory: explicit flag, then `DOCUCHAT_HOME`, then the platform data dir
#[inline]
pub fn resolve_base_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    if let Some(dir) = std::env::var_os(HOME_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("docuchat"))
        .context("Could not determine a data directory; pass --base-dir or set DOCUCHAT_HOME")
}

/// Print the effective configuration with secrets masked
#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("OpenAI Settings:").bold().yellow());
    eprintln!("  API Key: {}", style(redact(&config.openai.api_key)).cyan());
    eprintln!("  Base URL: {}", style(&config.openai.base_url).cyan());
    eprintln!("  Chat Model: {}", style(&config.openai.chat_model).cyan());
    eprintln!(
        "  Embedding Model: {} ({} dimensions)",
        style(&config.openai.embedding_model).cyan(),
        style(config.openai.embedding_dimension).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.openai.batch_size).cyan());

    eprintln!();
    eprintln!("{}", style("Retrieval Settings:").bold().yellow());
    eprintln!(
        "  Chunk Size / Overlap: {} / {}",
        style(config.chunking.chunk_size).cyan(),
        style(config.chunking.overlap_size).cyan()
    );
    eprintln!("  Search Limit: {}", style(config.search.default_limit).cyan());
    eprintln!(
        "  Similarity Threshold: {}",
        style(config.search.similarity_threshold).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Conversation Store:").bold().yellow());
    if config.redis.enabled {
        match config.redis.connection_url() {
            Ok(url) => eprintln!(
                "  Redis: {}:{} db {}{}",
                style(url.host_str().unwrap_or_default()).cyan(),
                style(config.redis.port).cyan(),
                style(config.redis.db).cyan(),
                if config.redis.tls { " (TLS)" } else { "" }
            ),
            Err(e) => eprintln!("  Redis: {} ({})", style("Invalid").red(), e),
        }
    } else {
        eprintln!("  Backend: {}", style("in-memory").cyan());
    }
    eprintln!(
        "  TTL: {}s, Max Length: {}",
        style(config.redis.conversation_ttl_secs).cyan(),
        style(config.redis.max_conversation_length).cyan()
    );

    eprintln!();
    eprintln!(
        "Server: {}",
        style(format!("{}:{}", config.server.host, config.server.port)).cyan()
    );
    eprintln!(
        "Cleanup interval: {}",
        style(format!("{}s", config.cleanup.interval_seconds)).cyan()
    );
    eprintln!("Vector DB root: {}", style(config.vector_db_root().display()).dim());
    eprintln!("Config file: {}", style(config.config_file_path().display()).dim());
}
