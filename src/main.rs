//! # corpus-qa CLI (`cqa`)
//!
//! The `cqa` binary is the reference front-end for corpus-qa. It provides
//! commands for building the index from a corpus directory, inspecting
//! retrieval, and asking grounded questions one-shot or interactively.
//!
//! ## Usage
//!
//! ```bash
//! cqa --config ./config/cqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cqa build` | Scan the corpus, chunk + embed it, persist the index |
//! | `cqa search "<query>"` | Show raw retrieval results with scores |
//! | `cqa ask "<question>"` | Answer one question from the corpus (or decline) |
//! | `cqa chat` | Interactive session over the corpus |
//! | `cqa stats` | Print the index manifest and counts |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use corpus_qa::{config, ingest, retrieve, session, stats};

/// corpus-qa — a retrieval-grounded question answering engine over a fixed
/// document corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cqa",
    about = "corpus-qa — retrieval-grounded question answering over a fixed document corpus",
    version,
    long_about = "corpus-qa chunks and embeds a corpus of normalized text documents into a \
    persisted similarity index, then answers questions only from retrieved fragments — \
    declining whenever the corpus holds no relevant evidence."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Build the index from the configured corpus directory.
    ///
    /// Scans the corpus root, chunks and embeds every document, and persists
    /// the finished index. Rebuilding replaces the previous index wholesale.
    Build {
        /// Show document and fragment counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show raw retrieval results for a query.
    ///
    /// Embeds the query and prints the fragments clearing the relevance
    /// floor, with scores, sources, and spans. Useful for tuning
    /// `retrieval.min_score`.
    Search {
        /// The search query string.
        query: String,

        /// Override `retrieval.top_k` for this query.
        #[arg(long)]
        k: Option<usize>,

        /// Override `retrieval.min_score` for this query.
        #[arg(long)]
        min_score: Option<f32>,
    },

    /// Ask a single question and print the grounded answer (or decline).
    Ask {
        /// The question to answer from the corpus.
        question: String,
    },

    /// Start an interactive chat session over the corpus.
    Chat,

    /// Print the index manifest and corpus counts.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build { dry_run } => {
            ingest::run_build(&cfg, dry_run).await?;
        }
        Commands::Search {
            query,
            k,
            min_score,
        } => {
            retrieve::run_search(&cfg, &query, k, min_score).await?;
        }
        Commands::Ask { question } => {
            session::run_ask(&cfg, &question).await?;
        }
        Commands::Chat => {
            session::run_chat(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
