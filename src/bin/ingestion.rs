//! Ingestion binary entry point.
//!
//! Extracts every PDF in the papers directory page by page, attaches the
//! BibTeX citation, chunks, embeds and writes the chunks to the index.
//!
//! # Examples
//!
//! Build a fresh index:
//! ```bash
//! ingestion --mode init-new --papers-dir ./papers --index-dir ./db
//! ```
//!
//! Add papers to an existing index:
//! ```bash
//! ingestion --papers-dir ./more_papers
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use citesearch::{
    citation::load_citations,
    config::{AppConfig, EmbeddingProviderKind},
    embedding::{AnyEmbeddingProvider, TimedEmbedding},
    extraction::discover_documents,
    ingestion::{prepare_corpus, IngestionPipeline},
    storage::sqlite::SqliteVectorStore,
    TextChunker,
};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Pipeline = IngestionPipeline<TimedEmbedding<AnyEmbeddingProvider>, SqliteVectorStore>;

/// Operation mode for the ingestion pipeline
#[derive(Debug, Clone, ValueEnum)]
enum Mode {
    /// Connect to an existing index and validate its embedding config (default)
    Connect,
    /// Create the index from scratch, discarding previous contents
    InitNew,
}

/// Ingestion CLI for building and updating the citation index
#[derive(Parser, Debug)]
#[command(
    name = "ingestion",
    version,
    about = "Build and update the paper citation index",
    long_about = "Extract academic PDFs page by page, attach BibTeX citations, chunk and embed the text, \
                  and write it to a persistent vector index.

EXAMPLES:
  Initialize a new index:
    ingestion --mode init-new --papers-dir ./papers --index-dir ./db

  Use OpenAI embeddings:
    OPENAI_API_KEY=sk-... ingestion --mode init-new --embedding-provider openai

  Smaller chunks and verbose logging:
    ingestion --chunk-size 500 --chunk-overlap 50 --log-level debug"
)]
struct IngestionArgs {
    /// Configuration file (defaults to ./citesearch.toml if present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory containing the PDF papers
    #[arg(long, value_name = "DIR")]
    papers_dir: Option<PathBuf>,

    /// BibTeX file with one entry per paper
    #[arg(long, value_name = "FILE")]
    bibliography: Option<PathBuf>,

    /// Directory holding the vector index
    #[arg(long, value_name = "DIR")]
    index_dir: Option<PathBuf>,

    /// Operation mode: connect to an existing index or initialize a new one
    #[arg(long, value_enum, default_value = "connect")]
    mode: Mode,

    /// Embedding provider to use
    #[arg(long, value_enum)]
    embedding_provider: Option<EmbeddingProviderKind>,

    /// Embedding model name (provider-dependent)
    #[arg(long, value_name = "MODEL")]
    embedding_model: Option<String>,

    /// FastEmbed model cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Chunk size in characters
    #[arg(long, value_name = "N")]
    chunk_size: Option<usize>,

    /// Characters shared between consecutive chunks
    #[arg(long, value_name = "N")]
    chunk_overlap: Option<usize>,

    /// Number of chunks per embedding batch
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

impl IngestionArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.papers_dir {
            config.paths.papers_dir = dir.clone();
        }
        if let Some(file) = &self.bibliography {
            config.paths.bibliography = file.clone();
        }
        if let Some(dir) = &self.index_dir {
            config.paths.index_dir = dir.clone();
        }
        if let Some(provider) = self.embedding_provider {
            config.embedding.provider = provider;
        }
        if let Some(model) = &self.embedding_model {
            config.embedding.model = Some(model.clone());
        }
        if let Some(dir) = &self.cache_dir {
            config.embedding.cache_dir = Some(dir.clone());
        }
        if let Some(size) = self.chunk_size {
            config.chunking.chunk_size = size;
        }
        if let Some(overlap) = self.chunk_overlap {
            config.chunking.chunk_overlap = overlap;
        }
        if let Some(batch) = self.batch_size {
            config.embedding.batch_size = batch;
        }
    }
}

/// Initialize logging subsystem with the specified level
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Open the index and set up the pipeline according to `mode`
async fn create_pipeline(config: &AppConfig, mode: &Mode) -> Result<Pipeline> {
    let provider = AnyEmbeddingProvider::from_settings(&config.embedding)
        .context("Failed to initialize embedding provider")?;
    let embedder = TimedEmbedding::new(provider, Duration::from_secs(config.embedding.timeout_secs));

    let storage = SqliteVectorStore::open(&config.paths.index_dir)
        .with_context(|| format!("Failed to open index in {}", config.paths.index_dir.display()))?;
    info!("Index: {}", storage.db_path().display());

    let batch_size = Some(config.embedding.batch_size);
    let pipeline = match mode {
        Mode::Connect => IngestionPipeline::connect(embedder, storage, batch_size)
            .await
            .context("Failed to connect to existing index. Use --mode init-new to create a new index.")?,
        Mode::InitNew => IngestionPipeline::initialize_new(embedder, storage, batch_size)
            .await
            .context("Failed to initialize new index")?,
    };

    debug!(batch_size = config.embedding.batch_size, "Pipeline created");
    Ok(pipeline)
}

/// Create a progress bar for tracking embedding
fn create_progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} chunks embedded")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    pb.set_style(style);
    pb
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = IngestionArgs::parse();
    init_logging(&args.log_level);

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    debug!(?config, "Effective configuration");

    info!("Starting paper ingestion");
    let start_time = Instant::now();

    let citations = load_citations(&config.paths.bibliography)
        .with_context(|| format!("Failed to load bibliography {}", config.paths.bibliography.display()))?;
    info!("Loaded {} citation records", citations.len());

    let documents = discover_documents(&config.paths.papers_dir)
        .with_context(|| format!("Failed to list papers in {}", config.paths.papers_dir.display()))?;
    if documents.is_empty() {
        warn!("No PDF files found in {}", config.paths.papers_dir.display());
        return Ok(());
    }
    info!("Found {} PDF files", documents.len());

    let chunker = TextChunker::new(config.chunking.to_config()?);
    let corpus = tokio::task::spawn_blocking(move || prepare_corpus(&documents, Arc::new(citations), chunker))
        .await
        .context("Document preparation task failed")?;
    info!(
        files = corpus.stats.files_processed,
        chunks = corpus.chunks.len(),
        "Documents prepared"
    );

    let mut pipeline = create_pipeline(&config, &args.mode).await?;

    let progress = create_progress_bar(corpus.chunks.len());
    let stats = pipeline
        .ingest_corpus(corpus, |done, _total| progress.set_position(done as u64))
        .await
        .context("Failed to ingest chunks")?;
    progress.finish();

    let elapsed = start_time.elapsed();
    println!("\n╔════════════════════════════════════════╗");
    println!("║      Ingestion Completed               ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Files processed:      {:>16} ║", stats.files_processed);
    println!("║ Files skipped:        {:>16} ║", stats.files_skipped);
    println!("║ Pages:                {:>16} ║", stats.pages);
    println!("║ Empty pages:          {:>16} ║", stats.empty_pages);
    println!("║ Rejected pages:       {:>16} ║", stats.rejected_pages);
    println!("║ Missing citations:    {:>16} ║", stats.missing_citations);
    println!("║ Chunks stored:        {:>16} ║", stats.stored);
    println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
    println!("╚════════════════════════════════════════╝");

    if stats.files_skipped > 0 {
        warn!("{} files could not be processed - check logs for details", stats.files_skipped);
    }
    if stats.missing_citations > 0 {
        warn!("{} papers have no BibTeX entry", stats.missing_citations);
    }

    info!("Ingestion completed successfully");
    Ok(())
}
