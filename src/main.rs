//! # Knowledge Harness CLI (`kh`)
//!
//! The `kh` binary is the primary interface for Knowledge Harness. It provides
//! commands for database initialization, document ingestion, search, document
//! inspection, keyword-category administration, and token reports.
//!
//! ## Usage
//!
//! ```bash
//! kh --config ./config/kh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kh init` | Create the knowledge and token databases |
//! | `kh ingest <path>` | Ingest a file or every matching file in a directory |
//! | `kh search "<query>"` | Keyword, vector, or hybrid search |
//! | `kh documents` | List ingested documents |
//! | `kh get <id>` | Show a document and its chunks |
//! | `kh delete <id>` | Delete a document and its chunks |
//! | `kh keywords ...` | Edit keyword categories, run the backfill |
//! | `kh stats` | Store overview |
//! | `kh tokens` | Token usage report |
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG` to adjust
//! (default `knowledge_harness=info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use knowledge_harness::config::{self, Config};
use knowledge_harness::ingest::{self, IngestOptions};
use knowledge_harness::keywords::{self, KeywordMap};
use knowledge_harness::models::{AnalysisMode, DocType, SourceType};
use knowledge_harness::progress::ProgressMode;
use knowledge_harness::search::{self, SearchMode, SearchOptions};
use knowledge_harness::store::EmbeddingStore;
use knowledge_harness::tokens::TokenLedger;
use knowledge_harness::{get, stats};

/// Knowledge Harness CLI: schema-guided ingestion and hybrid retrieval for
/// expert knowledge bases.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kh",
    about = "Knowledge Harness: schema-guided document ingestion and hybrid retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the knowledge and token databases.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ingest a file, or every matching file directly inside a directory.
    Ingest {
        /// File or directory to ingest. Directories are not recursed.
        path: PathBuf,

        /// Document type: knowledge, training, procedure, troubleshooting.
        #[arg(long)]
        doc_type: String,

        /// Analysis mode recorded on the document: text_only, vision, auto.
        #[arg(long, default_value = "text_only")]
        mode: String,

        /// Override the configured text model.
        #[arg(long)]
        model: Option<String>,

        /// Extension filter (repeatable). Defaults to `[ingest] extensions`.
        #[arg(long = "ext")]
        extensions: Vec<String>,

        /// Progress output on stderr: off, human, json. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search ingested chunks.
    Search {
        query: String,

        /// `keyword`, `vector`, or `hybrid`.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results. Defaults to `[retrieval] top_k`.
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict vector search to one chunk type.
        #[arg(long)]
        source_type: Option<String>,

        /// Restrict keyword search to one document type.
        #[arg(long)]
        doc_type: Option<String>,

        #[arg(long)]
        vector_weight: Option<f64>,

        #[arg(long)]
        keyword_weight: Option<f64>,
    },

    /// List ingested documents, newest first.
    Documents {
        #[arg(long)]
        doc_type: Option<String>,
    },

    /// Show a document and its chunks.
    Get { id: i64 },

    /// Delete a document and all of its chunks.
    Delete { id: i64 },

    /// Keyword category administration.
    Keywords {
        #[command(subcommand)]
        action: KeywordsAction,
    },

    /// Knowledge store overview.
    Stats,

    /// Token usage report.
    Tokens {
        /// Only count the last N days.
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Subcommand)]
enum KeywordsAction {
    /// List categories and their terms.
    List,
    /// Create an empty category.
    AddCategory { name: String },
    /// Remove a category and its terms.
    RemoveCategory { name: String },
    /// Add a term to a category (created when missing).
    Add { category: String, term: String },
    /// Remove a term from a category.
    Remove { category: String, term: String },
    /// Tag chunks that have no keywords with the known terms they contain.
    Backfill,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("knowledge_harness=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = EmbeddingStore::open(&cfg.db.path, cfg.embedding.dims).await?;
            let ledger = TokenLedger::open(&cfg.db.token_path()).await?;
            ledger.pool().close().await;
            store.pool().close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            doc_type,
            mode,
            model,
            extensions,
            progress,
        } => {
            let opts = IngestOptions {
                doc_type: doc_type.parse::<DocType>()?,
                analysis_mode: mode.parse::<AnalysisMode>()?,
                model,
            };
            let progress = match progress {
                Some(p) => p.parse::<ProgressMode>()?,
                None => ProgressMode::default_for_tty(),
            };
            let extensions = (!extensions.is_empty()).then_some(extensions);
            ingest::run_ingest(&cfg, &path, opts, extensions, progress).await?;
        }
        Commands::Search {
            query,
            mode,
            limit,
            source_type,
            doc_type,
            vector_weight,
            keyword_weight,
        } => {
            let opts = SearchOptions {
                mode: mode.parse::<SearchMode>()?,
                limit,
                doc_type: doc_type.map(|t| t.parse::<DocType>()).transpose()?,
                source_type: source_type
                    .map(|t| t.parse::<SourceType>())
                    .transpose()?,
                vector_weight,
                keyword_weight,
            };
            search::run_search(&cfg, &query, opts).await?;
        }
        Commands::Documents { doc_type } => {
            let doc_type = doc_type.map(|t| t.parse::<DocType>()).transpose()?;
            get::run_list(&cfg, doc_type).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, id).await?;
        }
        Commands::Delete { id } => {
            get::run_delete(&cfg, id).await?;
        }
        Commands::Keywords { action } => {
            run_keywords(&cfg, action).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Tokens { days } => {
            stats::run_token_stats(&cfg, days).await?;
        }
    }

    Ok(())
}

async fn run_keywords(cfg: &Config, action: KeywordsAction) -> anyhow::Result<()> {
    let mut map = KeywordMap::load(&cfg.keywords.path)
        .with_context(|| format!("loading {}", cfg.keywords.path.display()))?;

    match action {
        KeywordsAction::List => {
            if map.categories().is_empty() {
                println!("No keyword categories.");
            }
            for category in map.categories() {
                println!("{} ({})", category.name, category.terms.len());
                for term in &category.terms {
                    println!("    {}", term);
                }
            }
        }
        KeywordsAction::AddCategory { name } => {
            report(map.add_category(&name)?, "added category", "category exists", &name);
        }
        KeywordsAction::RemoveCategory { name } => {
            report(map.remove_category(&name)?, "removed category", "no such category", &name);
        }
        KeywordsAction::Add { category, term } => {
            let label = format!("{}:{}", category, term);
            report(map.add_term(&category, &term)?, "added", "already present", &label);
        }
        KeywordsAction::Remove { category, term } => {
            let label = format!("{}:{}", category, term);
            report(map.remove_term(&category, &term)?, "removed", "not found", &label);
        }
        KeywordsAction::Backfill => {
            let store = EmbeddingStore::open(&cfg.db.path, cfg.embedding.dims).await?;
            let result = keywords::backfill(&store, &map).await;
            store.pool().close().await;
            let report = result?;
            println!("keyword backfill");
            println!("  scanned: {}", report.scanned);
            println!("  updated: {}", report.updated);
            println!("ok");
        }
    }
    Ok(())
}

fn report(changed: bool, done: &str, unchanged: &str, subject: &str) {
    if changed {
        println!("{} {}", done, subject);
    } else {
        println!("{}: {}", unchanged, subject);
    }
}
