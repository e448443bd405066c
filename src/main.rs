//! # Aviation RAG CLI (`avrag`)
//!
//! ## Usage
//!
//! ```bash
//! avrag --config ./config/avrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `avrag init` | Create both databases and run schema migrations |
//! | `avrag seed` | Load sample flights, cargo, and documents |
//! | `avrag ingest` | Extract and store configured documents |
//! | `avrag chunk` | Split stored documents into chunk files |
//! | `avrag embed` | Embed chunk files |
//! | `avrag index` | Store embeddings and declare the vector index |
//! | `avrag validate` | Check embedding coverage |
//! | `avrag quality` | Run warehouse data-quality checks |
//! | `avrag report` | Rebuild the daily operations report |
//! | `avrag load-external` | Load external CSV data from S3 |
//! | `avrag pipeline <daily\|vectors>` | Run a workflow graph |
//! | `avrag query "<question>"` | Answer a question |
//! | `avrag serve` | Start the HTTP API |

use aviation_rag::{
    chunk, config, connector_s3, embed_cmd, ingest, migrate, pipeline, quality, rag, report,
    sample_data, server, telemetry, vector_store,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Aviation RAG: question answering over aviation operations documents and
/// a read API for flight and cargo data.
#[derive(Parser)]
#[command(name = "avrag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/avrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize both database schemas. Safe to run repeatedly.
    Init,

    /// Load sample flights and cargo into the staging tables, and write the
    /// sample documents into the first document path.
    Seed {
        /// Load straight into the curated tables read by the API.
        #[arg(long)]
        curated: bool,
    },

    /// Extract, categorise, and store every configured document.
    Ingest,

    /// Split stored documents into chunk files.
    Chunk,

    /// Embed every chunk file.
    Embed,

    /// Store embedding files and declare the vector index.
    Index,

    /// Fail unless enough stored chunks carry an embedding.
    Validate,

    /// Run the flight and cargo data-quality checks.
    Quality,

    /// Rebuild the daily operations report.
    Report {
        /// Report date (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Load external flight CSV files from S3.
    LoadExternal,

    /// Run a workflow graph.
    Pipeline {
        #[arg(value_enum)]
        name: PipelineName,
        /// Run date (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Answer a question from the document store.
    Query {
        question: String,
        /// Content type hint (e.g. `cargo`, `safety`, `regulations`).
        #[arg(long, default_value = rag::DEFAULT_CONTEXT_TYPE)]
        context_type: String,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum PipelineName {
    Daily,
    Vectors,
}

impl PipelineName {
    fn as_str(self) -> &'static str {
        match self {
            PipelineName::Daily => "daily",
            PipelineName::Vectors => "vectors",
        }
    }
}

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Databases initialized successfully.");
        }
        Commands::Seed { curated } => {
            sample_data::run_seed(&cfg, curated).await?;
        }
        Commands::Ingest => {
            ingest::run_ingest(&cfg).await?;
        }
        Commands::Chunk => {
            chunk::run_chunk(&cfg).await?;
        }
        Commands::Embed => {
            embed_cmd::run_embed(&cfg).await?;
        }
        Commands::Index => {
            vector_store::run_index(&cfg).await?;
        }
        Commands::Validate => {
            vector_store::run_validate(&cfg).await?;
        }
        Commands::Quality => {
            quality::run_quality(&cfg).await?;
        }
        Commands::Report { date } => {
            report::run_report(&cfg, date.unwrap_or_else(today)).await?;
        }
        Commands::LoadExternal => {
            connector_s3::run_load_external(&cfg).await?;
        }
        Commands::Pipeline { name, date } => {
            pipeline::run_pipeline(&cfg, name.as_str(), date.unwrap_or_else(today)).await?;
        }
        Commands::Query {
            question,
            context_type,
        } => {
            rag::run_query(&cfg, &question, &context_type).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
