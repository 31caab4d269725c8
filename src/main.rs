//! # Context QA CLI (`cqa`)
//!
//! Ask questions about a folder of documents. `cqa` ingests PDF, DOCX,
//! Markdown and text files, indexes them as embedded chunks, and answers
//! questions with a language model conditioned on the most relevant passages,
//! citing the chunks it used.
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
//! | `cqa init` | Create the SQLite database and run schema migrations |
//! | `cqa ingest <paths…>` | Extract, chunk, embed and index files or directories |
//! | `cqa query "<question>"` | Answer a question with source attribution |
//! | `cqa list` | List ingested documents |
//! | `cqa delete <id>` | Remove a document and its chunks |
//! | `cqa clear` | Remove every document |
//! | `cqa reindex` | Re-chunk and re-embed everything with the current settings |
//! | `cqa stats` | Show index statistics |
//! | `cqa templates` | List prompt templates and preset questions |
//! | `cqa serve` | Start the JSON HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! cqa init
//! cqa ingest ./resumes
//! cqa query "Which candidates have Kubernetes experience?" --template technical
//! cqa query --preset "Red Flags" --k 8
//! cqa query "How much vacation accrues per month?" --dry-run
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use context_qa::config;
use context_qa::documents;
use context_qa::ingest::{self, IngestOptions};
use context_qa::query::{self, QueryOptions};
use context_qa::{db, migrate, server, stats};
use context_qa_core::models::DocumentKind;

/// Context QA: retrieval-augmented question answering over your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cqa",
    about = "Context QA: ask questions about your documents",
    version,
    long_about = "Context QA ingests PDF, DOCX, Markdown and text files, indexes them as \
    embedded chunks, and answers questions with a language model conditioned on the most \
    relevant passages, citing the chunks it used."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest files or directories.
    ///
    /// Directories are walked recursively and filtered by
    /// `ingest.include_globs` / `ingest.exclude_globs`. Re-ingesting a
    /// document replaces its previous version; unchanged documents are
    /// skipped unless `--force` is given.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Document id to use instead of the file name (single file only).
        #[arg(long)]
        id: Option<String>,

        /// Document kind (`pdf`, `docx`, `txt`, `markdown`); inferred from
        /// the extension when omitted.
        #[arg(long, value_parser = parse_kind)]
        kind: Option<DocumentKind>,

        /// Re-embed even if the text is unchanged.
        #[arg(long)]
        force: bool,
    },

    /// Answer a question using the ingested documents.
    Query {
        /// The question. Omit when using `--preset`.
        question: Option<String>,

        /// Number of passages to retrieve (defaults to `retrieval.k`).
        #[arg(long)]
        k: Option<usize>,

        /// Prompt template name from `[templates]`.
        #[arg(long)]
        template: Option<String>,

        /// Ask a named preset question from `[presets]`.
        #[arg(long)]
        preset: Option<String>,

        /// Retrieve and assemble the prompt without calling the generator.
        #[arg(long)]
        dry_run: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List ingested documents.
    List {
        /// Print the listing as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete a document and all its chunks.
    Delete {
        /// Document id as shown by `cqa list`.
        id: String,
    },

    /// Delete every document and reset the index.
    Clear,

    /// Re-chunk and re-embed every stored document.
    ///
    /// Run this after changing the embedding model or chunking settings.
    Reindex,

    /// Show index statistics.
    Stats,

    /// List prompt templates and preset questions.
    Templates,

    /// Start the JSON HTTP server on `server.bind`.
    Serve,
}

fn parse_kind(s: &str) -> Result<DocumentKind, String> {
    s.parse::<DocumentKind>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            paths,
            id,
            kind,
            force,
        } => {
            ingest::run_ingest(&cfg, &paths, IngestOptions { id, kind, force }).await?;
        }
        Commands::Query {
            question,
            k,
            template,
            preset,
            dry_run,
            json,
        } => {
            let options = QueryOptions {
                k,
                template,
                preset,
                dry_run,
                json,
            };
            query::run_query(&cfg, question, options).await?;
        }
        Commands::List { json } => {
            documents::run_list(&cfg, json).await?;
        }
        Commands::Delete { id } => {
            documents::run_delete(&cfg, &id).await?;
        }
        Commands::Clear => {
            documents::run_clear(&cfg).await?;
        }
        Commands::Reindex => {
            documents::run_reindex(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Templates => {
            documents::run_templates(&cfg)?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
