//! # korquad-rag CLI (`krag`)
//!
//! The `krag` binary drives the whole service: store initialization, KorQuAD
//! ingestion, retrieval, question answering, embedding management, and the
//! HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! krag --config ./config/krag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `krag init` | Create the SQLite store and run schema migrations |
//! | `krag ingest` | Parse the KorQuAD dump, chunk, embed, and store it |
//! | `krag search "<question>"` | Retrieve similar passages |
//! | `krag ask "<question>"` | Full question answering with cited sources |
//! | `krag embed pending` | Backfill missing or stale embeddings |
//! | `krag embed rebuild` | Delete and regenerate all embeddings |
//! | `krag stats` | Show index statistics |
//! | `krag serve` | Start the HTTP API server |
//!
//! Environment overrides: `KRAG_STORE_DIR`, `KRAG_EMBEDDING_MODEL`,
//! `KRAG_LLM_MODEL`, `KRAG_PORT`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use korquad_rag::{config, embed_cmd, ingest, migrate, rag, retriever, server, stats};

/// korquad-rag CLI — Korean question answering over KorQuAD with
/// retrieval-augmented generation.
#[derive(Parser)]
#[command(
    name = "krag",
    about = "korquad-rag — Korean question answering over KorQuAD with retrieval-augmented generation",
    version,
    long_about = "korquad-rag ingests the KorQuAD v1.0 Wikipedia dump into a local SQLite \
    vector store, retrieves passages similar to an incoming question, and asks an \
    instruction-tuned language model to answer from the retrieved context."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/krag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the store schema.
    ///
    /// Creates the SQLite database and all required tables. Idempotent.
    Init,

    /// Ingest the KorQuAD dataset.
    ///
    /// Parses the JSON dump, deduplicates paragraphs, chunks them, embeds
    /// the chunks (when a provider is configured), and stores everything.
    Ingest {
        /// Dataset file path; overrides `[dataset] path` from config.
        #[arg(long)]
        path: Option<PathBuf>,

        /// Show document and chunk counts without writing to the store.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of passages to ingest.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Retrieve passages similar to a question.
    Search {
        /// The question text.
        question: String,

        /// Number of passages to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Similarity floor; overrides `retrieval.score_threshold`.
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Answer a question from the indexed passages.
    Ask {
        /// The question text.
        question: String,

        /// Number of passages to feed the language model.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show index statistics.
    Stats,

    /// Start the HTTP API server.
    Serve,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings.
    Pending {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings.
    ///
    /// Required after switching embedding models or dimensions.
    Rebuild {
        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Store initialized successfully.");
        }
        Commands::Ingest {
            path,
            dry_run,
            limit,
        } => {
            ingest::run_ingest(&cfg, path, dry_run, limit).await?;
        }
        Commands::Search {
            question,
            top_k,
            threshold,
        } => {
            retriever::run_search(&cfg, &question, top_k, threshold).await?;
        }
        Commands::Ask { question, top_k } => {
            rag::run_ask(&cfg, &question, top_k).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
