use anyhow::Result;
use clap::{Parser, Subcommand};
use docuchat::commands::{
    chat, cleanup, delete_file, ingest, init_config, list_files, load_config, search, serve,
};
use docuchat::config::show_config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docuchat")]
#[command(about = "Chat with your documents: per-user ingestion and retrieval-augmented answers")]
#[command(version)]
struct Cli {
    /// Application home (config.toml and vector_db/); defaults to DOCUCHAT_HOME or the platform data dir
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Start the HTTP API and the scheduled cleanup
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        host: Option<String>,
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Ingest a document, or every pdf/docx/txt file in a directory
    Ingest {
        /// File or directory to ingest
        path: PathBuf,
        /// Tenant that owns the documents
        #[arg(long)]
        user: String,
    },
    /// Ask a question about a user's documents
    Chat {
        #[arg(long)]
        user: String,
        /// The question
        query: String,
    },
    /// Show the chunks of a user's documents most similar to a query
    Search {
        #[arg(long)]
        user: String,
        /// Maximum number of chunks (defaults to the configured search limit)
        #[arg(long)]
        limit: Option<usize>,
        /// Minimum similarity between 0 and 1 (defaults to the configured threshold)
        #[arg(long)]
        threshold: Option<f32>,
        query: String,
    },
    /// List the documents ingested for a user
    Files {
        #[arg(long)]
        user: String,
    },
    /// Remove one document from a user's store
    Delete {
        #[arg(long)]
        user: String,
        /// File name as it was ingested
        #[arg(long)]
        file: String,
    },
    /// Wipe every user's vector store now
    Cleanup {
        /// Only report the storage status
        #[arg(long)]
        status: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docuchat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.base_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config);
            } else {
                init_config(&config)?;
            }
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await?;
        }
        Commands::Ingest { path, user } => {
            ingest(config, &path, &user).await?;
        }
        Commands::Chat { user, query } => {
            chat(config, &user, &query).await?;
        }
        Commands::Search {
            user,
            limit,
            threshold,
            query,
        } => {
            search(config, &user, &query, limit, threshold).await?;
        }
        Commands::Files { user } => {
            list_files(&config, &user).await?;
        }
        Commands::Delete { user, file } => {
            delete_file(&config, &user, &file).await?;
        }
        Commands::Cleanup { status } => {
            cleanup(&config, status).await?;
        }
    }

    Ok(())
}
