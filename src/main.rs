//! # doc-rag CLI (`rag`)
//!
//! Command-line front end for the document RAG service.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the SQLite database and intake/cache directories |
//! | `rag load` | Ingest every supported file in the intake directory |
//! | `rag ingest <path>` | Ingest a single file |
//! | `rag search "<query>"` | Show the top-k matching chunks |
//! | `rag ask "<query>"` | Answer a question from the indexed documents |
//! | `rag automate "<prompt>"` | Run a natural-language file task |
//! | `rag history` | Show recent interactions |
//! | `rag serve` | Start the HTTP server |
//!
//! Logs go to stderr; set `RUST_LOG` or pass `--verbose` for more detail.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use doc_rag::config::{self, Config};
use doc_rag::{migrate, server, service};

/// Document RAG: ingest files, retrieve relevant chunks, and answer questions.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "rag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and working directories.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ingest every supported file in the intake directory.
    ///
    /// Unchanged files are served from the cache and skipped by the index.
    Load,

    /// Ingest a single file (.txt, .md, .pdf, .docx).
    Ingest {
        path: PathBuf,
    },

    /// Print the chunks most similar to a query, without generating.
    Search {
        query: String,

        /// Number of chunks to return (defaults to `[retrieval].top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer a question using retrieved context.
    Ask {
        query: String,

        /// Ingest this file first and fall back to its chunks if retrieval
        /// finds nothing. Must be under the documents directory or an
        /// automation allow-list entry.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Run a file management task described in plain language.
    Automate {
        prompt: String,
    },

    /// Show recent queries and automation requests.
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            init(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load => {
            let svc = service::build_from_config(&cfg).await?;
            let report = svc.load_documents().await?;
            println!(
                "Loaded {} files: {} chunks ({} newly indexed), {} skipped, {} failed.",
                report.processed, report.chunks, report.indexed, report.skipped, report.failed
            );
        }
        Commands::Ingest { path } => {
            let svc = service::build_from_config(&cfg).await?;
            let outcome = svc.pipeline().process_file_detailed(&path).await?;
            println!(
                "{}: {} chunks, {} newly indexed{}",
                path.display(),
                outcome.chunks.len(),
                outcome.indexed,
                if outcome.cache_hit { " (cached)" } else { "" }
            );
        }
        Commands::Search { query, k } => {
            let svc = service::build_from_config(&cfg).await?;
            let k = k.unwrap_or(cfg.retrieval.top_k);
            let embedding = svc
                .pipeline()
                .embedder()
                .embed_query(&query)
                .await
                .context("failed to embed query")?;
            let result = svc.pipeline().retrieve(&embedding, k).await?;
            if result.is_empty() {
                println!("No results.");
            }
            for (i, (doc, meta)) in result.documents.iter().zip(&result.metadatas).enumerate() {
                println!("{}. [{} :: {}]", i + 1, meta.file, meta.source);
                println!("   {}", doc.replace('\n', " "));
            }
        }
        Commands::Ask { query, file } => {
            let svc = service::build_from_config(&cfg).await?;
            let answer = svc.query(&query, file.as_deref()).await?;
            println!("{}", answer.response);
            println!();
            println!("Sources:");
            for meta in &answer.metadata {
                println!("  - {} ({})", meta.file, meta.source);
            }
        }
        Commands::Automate { prompt } => {
            let svc = service::build_from_config(&cfg).await?;
            println!("{}", svc.automate(&prompt).await?);
        }
        Commands::History { limit } => {
            let svc = service::build_from_config(&cfg).await?;
            let entries = svc.history(limit.max(1)).await?;
            if entries.is_empty() {
                println!("No history.");
            }
            for entry in entries {
                println!("[{}] {} | {}", entry.created_at, entry.kind, entry.request);
                println!("    → {}", entry.response.replace('\n', " "));
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn init(cfg: &Config) -> anyhow::Result<()> {
    migrate::run_migrations(cfg).await?;
    for dir in [&cfg.documents.dir, &cfg.cache.dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    Ok(())
}
