//! citesearch - semantic search over a corpus of academic PDF papers.
//!
//! Papers are split into per-page text, tagged with their BibTeX citation,
//! chunked, embedded and stored in a persistent vector index. Queries are
//! embedded the same way and answered with ranked excerpts that carry the
//! paper, the page and a ready-made LaTeX citation.
//!
//! # Architecture
//!
//! - **citation**: BibTeX loading into citation records
//! - **extraction**: per-page PDF text extraction with page metadata
//! - **validation**: metadata sanitizing before persistence
//! - **chunking**: fixed-size overlapping text windows
//! - **embedding**: text embedding providers (fastembed, OpenAI, hashing)
//! - **storage**: vector store trait and its SQLite implementation
//! - **ingestion**: the offline pipeline tying the above together
//! - **generation**: LLM-backed query rewriting
//! - **query**: search execution and ranking
//! - **presentation**: result rendering, citation formatting, LLM material bundles
//! - **viewer**: opening a source document at a page
//! - **config**: layered configuration for the binaries
//!
//! # Workflow
//!
//! ## Offline Ingestion
//!
//! 1. Load the bibliography
//! 2. Extract, validate and chunk every PDF in parallel
//! 3. Embed chunk texts in batches
//! 4. Upsert all chunks into the index in one transaction
//!
//! ## Online Search
//!
//! 1. Optionally rewrite the query with an LLM
//! 2. Normalize and embed the query text
//! 3. Fetch the nearest chunks from the index
//! 4. Rank by the index's score order and present with citations
//!
//! # Example
//!
//! ```ignore
//! use citesearch::{
//!     embedding::hashing::HashingEmbedding,
//!     query::{QueryPipeline, SearchEngine, SearchQuery},
//!     storage::sqlite::SqliteVectorStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteVectorStore::open(std::path::Path::new("db"))?;
//!     let pipeline = QueryPipeline::connect(HashingEmbedding::default(), store).await?;
//!
//!     let outcome = pipeline.search(&SearchQuery::new("attention", 3)).await?;
//!     for result in outcome.results {
//!         println!("{}: {}", result.chunk.id, result.score);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod chunking;
pub mod citation;
pub mod config;
pub mod embedding;
pub mod extraction;
pub mod generation;
pub mod ingestion;
pub mod models;
pub mod presentation;
pub mod query;
pub mod storage;
pub mod validation;
pub mod viewer;

// Re-export commonly used types at the crate root
pub use chunking::{ChunkingConfig, TextChunker};
pub use embedding::EmbeddingProvider;
pub use models::{
    Chunk, CitationMap, CitationRecord, EmbeddingConfig, Metadata, MetadataValue, RelevanceLevel, SearchResult,
    PAGE_INDEX_BASE,
};
pub use query::{QueryPipeline, SearchEngine, SearchQuery};
pub use storage::{DistanceMetric, ScoreOrder, VectorStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
