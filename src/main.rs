//! # NCM Harness CLI (`ncm`)
//!
//! The `ncm` binary drives the extraction and classification pipeline.
//!
//! ## Usage
//!
//! ```bash
//! ncm --config ./config/ncm.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ncm init` | Create the SQLite database and run schema migrations |
//! | `ncm extract <file>` | Extract header and line items from a PDF/image |
//! | `ncm classify <file>` | Extract, then classify every line item |
//! | `ncm search "<query>"` | Run the layered nomenclature search |
//! | `ncm expand "<description>"` | Rewrite a description in nomenclature phrasing |

mod batch;
mod classify;
mod config;
mod db;
mod embedding;
mod error;
mod expand;
mod extractor;
mod migrate;
mod models;
mod prompts;
mod repair;
mod search;
mod split;
mod store;
mod trigram;
mod vision;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::classify::Classifier;
use crate::config::Config;
use crate::embedding::{EmbeddingApi, OpenAiEmbeddingClient};
use crate::expand::Expander;
use crate::extractor::Extractor;
use crate::models::MediaKind;
use crate::search::{
    catalog_layer, combine_results, exact_code_search, fulltext_layer, is_code_query,
    semantic_layer, trigram_layer,
};
use crate::store::sqlite::SqliteStore;
use crate::vision::OpenAiVisionClient;

/// NCM Harness: invoice extraction and customs nomenclature
/// classification.
#[derive(Parser)]
#[command(
    name = "ncm",
    about = "Invoice extraction and multi-layer customs nomenclature classification",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ncm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Extract the header and line items from a document.
    Extract {
        /// PDF or image file.
        file: PathBuf,
    },

    /// Extract a document and classify every line item.
    Classify {
        /// PDF or image file.
        file: PathBuf,
        /// Provider the invoice belongs to; enables the catalog shortcut.
        #[arg(long)]
        provider: Option<String>,
    },

    /// Search the nomenclature with every configured layer.
    Search {
        query: String,
        /// Maximum results.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Expand a product description into nomenclature phrasing.
    Expand { description: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Extract { file } => run_extract(&config, &file).await,
        Commands::Classify { file, provider } => {
            run_classify(&config, &file, provider.as_deref()).await
        }
        Commands::Search { query, limit } => run_search(&config, &query, limit).await,
        Commands::Expand { description } => run_expand(&config, &description).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("ok");
    Ok(())
}

fn media_kind_for(file: &PathBuf) -> MediaKind {
    let ext = file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    MediaKind::from_extension(ext)
}

async fn run_extract(config: &Config, file: &PathBuf) -> Result<()> {
    let bytes = std::fs::read(file)?;
    let vision = OpenAiVisionClient::new(&config.vision)?;
    let extractor = Extractor::new(vision, config.extraction.clone());

    let document = extractor.extract(&bytes, media_kind_for(file)).await?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

async fn run_classify(config: &Config, file: &PathBuf, provider: Option<&str>) -> Result<()> {
    let bytes = std::fs::read(file)?;
    let vision = OpenAiVisionClient::new(&config.vision)?;
    let extractor = Extractor::new(vision, config.extraction.clone());
    let document = extractor.extract(&bytes, media_kind_for(file)).await?;

    if document.items.is_empty() {
        println!("No line items extracted.");
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("classify requires embeddings. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let expander = Expander::new(OpenAiVisionClient::new(&config.vision)?);
    let embedding = OpenAiEmbeddingClient::new(&config.embedding)?;

    let classifier = Classifier::new(
        expander,
        embedding,
        store,
        config.search.clone(),
        config.classify.clone(),
    );

    let results = classifier.classify(&document.items, provider).await?;

    for (item, result) in document.items.iter().zip(&results) {
        println!(
            "{:>3}. {} -> {} [{:?}, {:?}]",
            item.line_number,
            item.original_description,
            result.ncm_code.as_deref().unwrap_or("(unresolved)"),
            result.confidence,
            result.source,
        );
    }

    pool.close().await;
    Ok(())
}

async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let search_cfg = &config.search;
    let final_limit = limit.unwrap_or(search_cfg.final_limit);

    let results = if is_code_query(query) {
        exact_code_search(&store, query, final_limit as i64).await?
    } else {
        let expander = Expander::new(OpenAiVisionClient::new(&config.vision)?);
        let expanded = expander.expand_one(query).await;

        let query_vec = if config.embedding.is_enabled() {
            let embedding = OpenAiEmbeddingClient::new(&config.embedding)?;
            match embedding.embed(&[expanded.clone()]).await {
                Ok(mut vectors) => vectors.pop().unwrap_or_default(),
                Err(e) => {
                    tracing::warn!("embedding failed, skipping semantic layer: {e}");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let (catalog, fulltext, trigram) = futures::join!(
            catalog_layer(&store, None, query, search_cfg),
            fulltext_layer(&store, query, &expanded, search_cfg),
            trigram_layer(&store, query, search_cfg),
        );
        let semantic = semantic_layer(&store, &query_vec, search_cfg).await?;

        combine_results(
            vec![catalog?, fulltext?, trigram?, semantic],
            search_cfg,
            final_limit,
        )
    };

    if results.is_empty() {
        println!("No results.");
    } else {
        for (i, result) in results.iter().enumerate() {
            println!(
                "{}. [{:.2}] {} / {} ({})",
                i + 1,
                result.similarity,
                result.ncm_code,
                result.description,
                result.source
            );
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_expand(config: &Config, description: &str) -> Result<()> {
    let expander = Expander::new(OpenAiVisionClient::new(&config.vision)?);
    println!("{}", expander.expand_one(description).await);
    Ok(())
}
