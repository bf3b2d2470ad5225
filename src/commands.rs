use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::app::Services;
use crate::cleanup::{CleanupOutcome, CleanupScheduler};
use crate::config::{Config, resolve_base_dir};
use crate::database::{LanceTenants, TenantIndexes};
use crate::ingestion::{DocumentUpload, collect_documents};
use crate::server::HttpServer;

/// Resolve the base directory and load its configuration
#[inline]
pub fn load_config(base_dir: Option<PathBuf>) -> Result<Config> {
    let base_dir = resolve_base_dir(base_dir)?;
    Config::load(&base_dir)
        .with_context(|| format!("Failed to load configuration from {}", base_dir.display()))
}

/// Write `config.toml` if the base directory has none yet
#[inline]
pub fn init_config(config: &Config) -> Result<()> {
    let path = config.config_file_path();
    if path.exists() {
        println!("Configuration already exists at {}", path.display());
        return Ok(());
    }
    config.save()?;
    println!(
        "{} Wrote configuration to {}",
        style("✓").green(),
        path.display()
    );
    Ok(())
}

/// Run the HTTP API and the cleanup scheduler until Ctrl-C
#[inline]
pub async fn serve(config: Config) -> Result<()> {
    let services = Services::from_config(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let cleanup_task = Arc::clone(&services.cleanup).spawn(shutdown_rx.clone());
    let mut server = pin!(HttpServer::new(services, shutdown_rx).serve());

    let finished = tokio::select! {
        result = &mut server => Some(result),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Received Ctrl-C, shutting down");
            None
        }
    };
    let result = match finished {
        Some(result) => result,
        None => {
            // receivers may already be gone if the server exited
            let _ = shutdown_tx.send(true);
            server.await
        }
    };

    let _ = shutdown_tx.send(true);
    cleanup_task.await.context("Cleanup scheduler panicked")?;
    result
}

/// Ingest one document, or every supported document in a directory, for `user_id`
#[inline]
pub async fn ingest(config: Config, path: &Path, user_id: &str) -> Result<()> {
    let documents = collect_documents(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if documents.is_empty() {
        println!("No supported documents (pdf, docx, txt) found in {}", path.display());
        return Ok(());
    }

    let services = Services::from_config(config)?;
    let bar = if console::user_attended_stderr() {
        ProgressBar::new(documents.len() as u64).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] Ingesting {msg}")
                .context("Invalid progress template")?,
        )
    } else {
        ProgressBar::hidden()
    };

    let mut failed = 0;
    let mut chunks = 0;
    for document in &documents {
        let name = document
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        bar.set_message(name.clone());

        let result = match DocumentUpload::from_path(document).await {
            Ok(upload) => services.ingestion.process_document(&upload, user_id).await,
            Err(e) => {
                warn!("Failed to read {}: {}", document.display(), e);
                failed += 1;
                bar.println(format!("{} {}: {}", style("✗").red(), name, e));
                bar.inc(1);
                continue;
            }
        };

        if result.is_success() {
            chunks += result.chunks_processed;
            bar.println(format!(
                "{} {} ({} chunks)",
                style("✓").green(),
                name,
                result.chunks_processed
            ));
        } else {
            failed += 1;
            bar.println(format!("{} {}: {}", style("✗").red(), name, result.message));
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    println!(
        "Ingested {} of {} documents ({} chunks) for user {}",
        documents.len() - failed,
        documents.len(),
        chunks,
        user_id
    );
    if failed > 0 {
        bail!("{} of {} documents failed to ingest", failed, documents.len());
    }
    Ok(())
}

/// Ask one question and print the answer
#[inline]
pub async fn chat(config: Config, user_id: &str, query: &str) -> Result<()> {
    let services = Services::from_config(config)?;
    match services.engine.chat(query, user_id).await {
        Ok(answer) => {
            println!("{}", answer);
            Ok(())
        }
        Err(failure) => bail!("{}", failure),
    }
}

/// Print the chunks of `user_id`'s documents most similar to `query`
///
/// `limit` and `threshold` fall back to the `search` configuration section.
#[inline]
pub async fn search(
    config: Config,
    user_id: &str,
    query: &str,
    limit: Option<usize>,
    threshold: Option<f32>,
) -> Result<()> {
    if threshold.is_some_and(|t| !(0.0..=1.0).contains(&t)) {
        bail!("--threshold must be between 0 and 1");
    }
    let limit = limit.unwrap_or(config.search.default_limit).max(1);
    let services = Services::from_config(config)?;
    let threshold = threshold.unwrap_or_else(|| services.agent.similarity_threshold());

    let hits = services
        .agent
        .search(query, user_id, limit, Some(threshold))
        .await?;
    if hits.is_empty() {
        println!(
            "No chunks of {}'s documents reach similarity {}",
            user_id, threshold
        );
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{} {} chunk {} {}",
            style(format!("{}.", rank + 1)).bold(),
            style(&hit.file_name).cyan(),
            hit.chunk_index,
            style(format!("(similarity {:.3})", hit.similarity_score)).dim()
        );
        println!("   {}", hit.text.replace('\n', " "));
    }
    Ok(())
}

/// Print the files ingested for `user_id`
#[inline]
pub async fn list_files(config: &Config, user_id: &str) -> Result<()> {
    let tenants = LanceTenants::from_config(config);
    let summary = tenants.index_for(user_id)?.files_summary().await?;

    if summary.files.is_empty() {
        println!("No documents have been ingested for user {}.", user_id);
        return Ok(());
    }

    println!(
        "{} ({} files, {} chunks)",
        style(format!("Documents for {}", user_id)).bold(),
        summary.total_files,
        summary.total_chunks
    );
    for file in &summary.files {
        let created = file.created_at.map_or_else(
            || "unknown".to_string(),
            |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        println!(
            "  {} [{}] {} chunks, ingested {}",
            style(&file.file_name).cyan(),
            file.file_type,
            file.chunk_count,
            style(created).dim()
        );
    }
    Ok(())
}

/// Remove one file's chunks from `user_id`'s store
#[inline]
pub async fn delete_file(config: &Config, user_id: &str, file_name: &str) -> Result<()> {
    let tenants = LanceTenants::from_config(config);
    let removed = tenants.index_for(user_id)?.delete_by_file(file_name).await?;
    if removed == 0 {
        println!("No chunks of {} found for user {}", file_name, user_id);
    } else {
        println!(
            "{} Removed {} chunks of {} for user {}",
            style("✓").green(),
            removed,
            file_name,
            user_id
        );
    }
    Ok(())
}

/// Wipe every tenant store now, or only report the storage status
#[inline]
pub async fn cleanup(config: &Config, status_only: bool) -> Result<()> {
    let scheduler = CleanupScheduler::from_config(config);

    if status_only {
        let status = scheduler.status().await;
        println!("Vector DB path: {}", status.vector_db_path);
        println!("Exists: {}", status.vector_db_exists);
        println!("Items: {}", status.items_in_vector_db);
        println!(
            "Cleanup interval: {}s ({:.2}h)",
            status.cleanup_interval_seconds, status.cleanup_interval_hours
        );
        return Ok(());
    }

    let report = scheduler.run_once().await;
    match report.status {
        CleanupOutcome::Success => {
            println!(
                "{} {} ({} items removed)",
                style("✓").green(),
                report.message,
                report.items_removed
            );
            Ok(())
        }
        CleanupOutcome::Error => bail!("{}", report.message),
    }
}
