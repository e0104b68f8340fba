//! Query processing and ranking module.
//!
//! This module handles search queries: optional rewriting, embedding,
//! nearest-neighbour lookup and ranking. It coordinates between the text
//! generator, the embedding provider and the vector store.
//!
//! # Usage
//!
//! ```rust,no_run
//! use citesearch::embedding::hashing::HashingEmbedding;
//! use citesearch::query::{QueryPipeline, SearchEngine, SearchQuery};
//! use citesearch::storage::sqlite::SqliteVectorStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteVectorStore::open(std::path::Path::new("db"))?;
//! let pipeline = QueryPipeline::connect(HashingEmbedding::default(), store).await?;
//!
//! let outcome = pipeline.search(&SearchQuery::new("attention heads", 3)).await?;
//! for result in outcome.results {
//!     println!("{} p.{} - {:.3}", result.chunk.metadata.paper_name().unwrap_or("?"),
//!         result.chunk.metadata.page_num().unwrap_or(0), result.score);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::embedding::{normalize_text, EmbeddingError, EmbeddingProvider};
use crate::generation::{QueryRewriter, TextGenerator};
use crate::models::{ScoredChunk, SearchResult};
use crate::storage::{DistanceMetric, StorageError, VectorStore};

/// Errors that can occur during query processing.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Storage access failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// An external collaborator (text generator, viewer) failed
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The index was built with a different embedding model
    #[error("Incompatible index: {0}")]
    IncompatibleIndex(String),

    /// Invalid query parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Search query parameters.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Free-text query
    pub query: String,

    /// Maximum number of results to return
    pub top_k: usize,

    /// Reformulate the query through the text generator first
    pub rewrite: bool,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
            rewrite: false,
        }
    }

    pub fn with_rewrite(mut self, rewrite: bool) -> Self {
        self.rewrite = rewrite;
        self
    }
}

/// What a search produced.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// The query as typed
    pub query: String,

    /// The text actually embedded, when it differs from `query`
    pub rewritten: Option<String>,

    /// Ranked results, most relevant first
    pub results: Vec<SearchResult>,
}

/// Trait for search engines.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Execute a search query and return ranked results.
    async fn search(&self, query: &SearchQuery) -> QueryResult<QueryOutcome>;
}

/// Order store results most relevant first and attach relevance levels.
///
/// The direction comes from `metric.score_order()`; distances sort
/// ascending, similarities descending. The sort is stable.
pub fn rank_results(scored: Vec<ScoredChunk>, metric: DistanceMetric) -> Vec<SearchResult> {
    let order = metric.score_order();
    let mut scored = scored;
    scored.sort_by(|a, b| order.compare(a.score, b.score));

    scored
        .into_iter()
        .map(|s| {
            let similarity = metric.similarity(s.score);
            SearchResult::new(s.chunk, s.score, similarity)
        })
        .collect()
}

/// Rewrite, embed, look up and rank.
pub struct QueryPipeline<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    embedder: E,
    store: S,
    rewriter: Option<QueryRewriter<Box<dyn TextGenerator>>>,
}

impl<E, S> QueryPipeline<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    /// Build a pipeline without checking the index configuration.
    pub fn new(embedder: E, store: S) -> Self {
        Self {
            embedder,
            store,
            rewriter: None,
        }
    }

    /// Build a pipeline after checking that `embedder` matches the model the
    /// index was built with.
    ///
    /// # Errors
    /// `IncompatibleIndex` if the stored model name or dimension differs.
    pub async fn connect(embedder: E, store: S) -> QueryResult<Self> {
        match store.get_config().await? {
            Some(config) => {
                if config.model_name != embedder.model_name() || config.dimension != embedder.dimension() {
                    return Err(QueryError::IncompatibleIndex(format!(
                        "index built with {} ({} dims), query embedder is {} ({} dims)",
                        config.model_name,
                        config.dimension,
                        embedder.model_name(),
                        embedder.dimension()
                    )));
                }
                info!(model = %config.model_name, dimension = config.dimension, "Connected to index");
            }
            None => debug!("Index has no embedding configuration yet"),
        }
        Ok(Self::new(embedder, store))
    }

    pub fn with_rewriter(mut self, rewriter: QueryRewriter<Box<dyn TextGenerator>>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn can_rewrite(&self) -> bool {
        self.rewriter.is_some()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn rewrite(&self, query: &str) -> QueryResult<String> {
        let rewriter = self.rewriter.as_ref().ok_or_else(|| {
            QueryError::InvalidQuery("query rewriting requested but no text generator is configured".to_string())
        })?;
        rewriter
            .rewrite(query)
            .await
            .map_err(|e| QueryError::Upstream(e.to_string()))
    }
}

#[async_trait]
impl<E, S> SearchEngine for QueryPipeline<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    async fn search(&self, query: &SearchQuery) -> QueryResult<QueryOutcome> {
        if query.query.trim().is_empty() {
            return Err(QueryError::InvalidQuery("query text is empty".to_string()));
        }
        if query.top_k == 0 {
            return Err(QueryError::InvalidQuery("top_k must be at least 1".to_string()));
        }

        let rewritten = if query.rewrite {
            Some(self.rewrite(&query.query).await?)
        } else {
            None
        };
        let text = rewritten.as_deref().unwrap_or(&query.query);

        let embedding = self.embedder.embed(&normalize_text(text)).await?;
        let scored = self.store.query(&embedding, query.top_k).await?;
        let results = rank_results(scored, self.store.distance_metric());

        debug!(query = %query.query, results = results.len(), "Search complete");
        Ok(QueryOutcome {
            query: query.query.clone(),
            rewritten,
            results,
        })
    }
}
