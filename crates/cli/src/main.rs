use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::render;
use compass_core::config::{self, AppConfig};
use compass_core::pipeline::{self, Orchestrator};
use compass_core::safety::SafetyClassifier;
use compass_core::vectorstore::{self, VectorIndex};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { dir, clear, json } => run_ingest(cfg, dir, clear, json).await,
        Commands::Ask { query, k, json } => run_ask(cfg, &query, k, json).await,
        Commands::Search { query, k, json } => run_search(cfg, &query, k, json).await,
        Commands::Check { query, json } => run_check(&query, json),
        Commands::Stats { json } => run_stats(cfg, json).await,
        Commands::Clear => run_clear(cfg).await,
    }
}

#[derive(Parser)]
#[command(name = "health-compass")]
#[command(about = "Educational health information from trusted sources", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the corpus from raw JSON documents and add it to the index
    Ingest {
        /// Directory of raw documents (one subdirectory per source)
        dir: PathBuf,
        /// Empty the index first
        #[arg(long, default_value_t = false)]
        clear: bool,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Answer a health question from indexed sources
    Ask {
        query: String,
        /// Number of passages to retrieve (defaults to retrieval.top_k)
        #[arg(short, long)]
        k: Option<usize>,
        /// Output the answer envelope as JSON
        #[arg(long)]
        json: bool,
    },
    /// Nearest indexed passages, without generation
    Search {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Safety triage only
    Check {
        query: String,
        #[arg(long)]
        json: bool,
    },
    /// Index size and embedding model
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Delete every indexed chunk
    Clear,
}

async fn run_ingest(cfg: AppConfig, dir: PathBuf, clear: bool, json: bool) -> Result<()> {
    let registry = pipeline::build_registry(&cfg).await?;
    let index = pipeline::open_index(&cfg, &registry).await?;
    if clear {
        info!("clearing index before ingest");
        index.clear().await.context("clear index")?;
    }
    let summary = pipeline::ingest_directory(index.as_ref(), &dir, &cfg.corpus).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "documents {}, chunks {}, stored {}, duplicates {}, failed batches {}; index now holds {} chunks",
            summary.documents,
            summary.chunks,
            summary.report.stored,
            summary.report.duplicates,
            summary.report.failed_batches,
            summary.total_indexed
        );
    }
    Ok(())
}

async fn run_ask(cfg: AppConfig, query: &str, k: Option<usize>, json: bool) -> Result<()> {
    let registry = pipeline::build_registry(&cfg).await?;
    let index = pipeline::open_index(&cfg, &registry).await?;
    let orchestrator = Orchestrator::from_config(&cfg, &registry, index)?;
    let envelope = orchestrator
        .answer(query, k.unwrap_or(cfg.retrieval.top_k))
        .await;
    if json {
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        print!("{}", render::render_answer(&envelope));
    }
    Ok(())
}

async fn run_search(cfg: AppConfig, query: &str, k: Option<usize>, json: bool) -> Result<()> {
    let registry = pipeline::build_registry(&cfg).await?;
    let index = pipeline::open_index(&cfg, &registry).await?;
    let hits = index
        .search(query, k.unwrap_or(cfg.retrieval.top_k))
        .await
        .context("search index")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else {
        print!("{}", render::render_hits(&hits));
    }
    Ok(())
}

fn run_check(query: &str, json: bool) -> Result<()> {
    let verdict = SafetyClassifier::new().classify(query);
    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print!("{}", render::render_verdict(&verdict));
    }
    Ok(())
}

async fn run_stats(cfg: AppConfig, json: bool) -> Result<()> {
    let registry = pipeline::build_registry(&cfg).await?;
    let index = pipeline::open_index(&cfg, &registry).await?;
    let stats = index.stats().await?;
    let documents = vectorstore::indexed_documents(index.pool()).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "stats": stats,
                "documents": documents,
            }))?
        );
    } else {
        print!("{}", render::render_stats(&stats, documents));
    }
    Ok(())
}

async fn run_clear(cfg: AppConfig) -> Result<()> {
    let registry = pipeline::build_registry(&cfg).await?;
    let index = pipeline::open_index(&cfg, &registry).await?;
    index.clear().await?;
    println!("index cleared");
    Ok(())
}
