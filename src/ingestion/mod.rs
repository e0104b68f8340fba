//! Ingestion pipeline module.
//!
//! Ingestion runs in two stages:
//!
//! 1. **Preparation** (CPU bound, parallel): every PDF is opened, its pages
//!    are extracted, their metadata validated and their text chunked. Files
//!    are processed on the rayon thread pool; a file that fails is logged and
//!    skipped without aborting the run.
//! 2. **Persistence** (sequential): chunk texts are embedded in batches and
//!    all chunks are written to the vector store in one final upsert.
//!
//! # Usage Patterns
//!
//! ## Primary: Adding Papers to an Existing Index
//!
//! ```ignore
//! let store = SqliteVectorStore::open(Path::new("db"))?;
//! let mut pipeline = IngestionPipeline::connect(embedder, store, None).await?;
//!
//! let prepared = prepare_corpus(&paths, Arc::new(citations), chunker);
//! let stats = pipeline.ingest_corpus(prepared, |_, _| {}).await?;
//! println!("Stored {} chunks", stats.stored);
//! ```
//!
//! `connect` refuses an index built with a different embedding model.
//!
//! ## Secondary: Creating a New Index
//!
//! ```ignore
//! let store = SqliteVectorStore::open(Path::new("db"))?;
//! let mut pipeline = IngestionPipeline::initialize_new(embedder, store, Some(64)).await?;
//! ```
//!
//! `initialize_new` clears whatever the index held before.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chunking::TextChunker;
use crate::citation::CitationError;
use crate::embedding::{normalize_text, EmbeddingError, EmbeddingProvider};
use crate::extraction::{paper_identifier, ExtractionError, PdfDocument};
use crate::models::{CitationMap, Chunk, EmbeddingConfig};
use crate::storage::{StorageError, VectorStore};
use crate::validation::validate_metadata_with_report;

/// Default number of chunks embedded per call.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Errors that can occur during ingestion.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// A document could not be extracted
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// The bibliography could not be loaded
    #[error("Citation error: {0}")]
    Citation(#[from] CitationError),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid input data or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Statistics from an ingestion run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionStats {
    /// Documents that were extracted and chunked
    pub files_processed: usize,

    /// Documents skipped because they could not be opened or parsed
    pub files_skipped: usize,

    /// Pages seen across all processed documents
    pub pages: usize,

    /// Pages without any extractable text
    pub empty_pages: usize,

    /// Chunks produced
    pub chunks: usize,

    /// Pages whose metadata was unusable, so none of their chunks were kept
    pub rejected_pages: usize,

    /// Metadata fields dropped by validation
    pub fields_dropped: usize,

    /// Documents with no citation record
    pub missing_citations: usize,

    /// Chunks written to the store
    pub stored: usize,
}

impl IngestionStats {
    /// Create new empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add another run's counts to this one.
    pub fn merge(&mut self, other: &IngestionStats) {
        self.files_processed += other.files_processed;
        self.files_skipped += other.files_skipped;
        self.pages += other.pages;
        self.empty_pages += other.empty_pages;
        self.chunks += other.chunks;
        self.rejected_pages += other.rejected_pages;
        self.fields_dropped += other.fields_dropped;
        self.missing_citations += other.missing_citations;
        self.stored += other.stored;
    }
}

/// Chunks produced from one document.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub paper_name: String,
    pub path: PathBuf,
    pub chunks: Vec<Chunk>,
    pub stats: IngestionStats,
}

/// Chunks produced from a whole corpus.
#[derive(Debug, Clone, Default)]
pub struct PreparedCorpus {
    pub chunks: Vec<Chunk>,
    pub stats: IngestionStats,
}

/// Extract, validate and chunk one document.
///
/// Whitespace-only pages and chunks are skipped. A page whose validated
/// metadata lacks `paper_name` or `page_num` contributes no chunks.
pub fn prepare_document(
    path: &Path,
    citations: &CitationMap,
    chunker: &TextChunker,
) -> IngestionResult<PreparedDocument> {
    let document = PdfDocument::open(path, citations)?;
    let mut stats = IngestionStats::new();
    let mut chunks = Vec::new();

    if !citations.contains_key(document.paper_name()) {
        stats.missing_citations += 1;
    }

    for page in document.pages() {
        stats.pages += 1;
        if page.text.trim().is_empty() {
            stats.empty_pages += 1;
            continue;
        }

        let (metadata, dropped) = validate_metadata_with_report(&page.metadata.to_raw());
        for err in &dropped {
            error!(
                paper = %document.paper_name(),
                page = page.metadata.page_num,
                field = err.field(),
                "{}",
                err
            );
        }
        stats.fields_dropped += dropped.len();

        if !metadata.is_storable() {
            stats.rejected_pages += 1;
            continue;
        }

        chunks.extend(
            chunker
                .chunk_page(&page.text, &metadata)
                .into_iter()
                .filter(|chunk| !chunk.text.trim().is_empty()),
        );
    }

    stats.files_processed = 1;
    stats.chunks = chunks.len();
    debug!(
        paper = %document.paper_name(),
        pages = stats.pages,
        chunks = stats.chunks,
        "Prepared document"
    );

    Ok(PreparedDocument {
        paper_name: document.paper_name().to_string(),
        path: document.full_path().to_path_buf(),
        chunks,
        stats,
    })
}

/// Prepare every document in parallel, keeping input order.
///
/// Per-file failures are logged and counted in `files_skipped`. Chunk ids
/// are derived from the paper identifier, so when two files share one (e.g.
/// `a.pdf` and `a.PDF`) only the first is kept.
pub fn prepare_corpus(paths: &[PathBuf], citations: Arc<CitationMap>, chunker: TextChunker) -> PreparedCorpus {
    let mut corpus = PreparedCorpus::default();

    let mut seen: HashMap<String, &Path> = HashMap::new();
    let mut unique = Vec::with_capacity(paths.len());
    for path in paths {
        if let Ok(identifier) = paper_identifier(path) {
            if let Some(first) = seen.get(&identifier) {
                let e = ExtractionError::DuplicateIdentifier {
                    identifier,
                    path: path.display().to_string(),
                    first: first.display().to_string(),
                };
                error!(path = %path.display(), error = %e, "Skipping document");
                corpus.stats.files_skipped += 1;
                continue;
            }
            seen.insert(identifier, path.as_path());
        }
        unique.push(path);
    }

    let results: Vec<(&PathBuf, IngestionResult<PreparedDocument>)> = unique
        .into_par_iter()
        .map(|path| (path, prepare_document(path, &citations, &chunker)))
        .collect();

    for (path, result) in results {
        match result {
            Ok(document) => {
                corpus.stats.merge(&document.stats);
                corpus.chunks.extend(document.chunks);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping document");
                corpus.stats.files_skipped += 1;
            }
        }
    }
    corpus
}

/// Ingestion pipeline coordinator.
///
/// Owns the embedding provider and the vector store for the duration of a
/// run. Writes go through `&mut self`, so there is one writer per pipeline.
pub struct IngestionPipeline<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    /// Embedding provider for chunk texts
    embedding_provider: E,

    /// Vector store receiving the chunks
    storage: S,

    /// Number of chunks embedded per call
    batch_size: usize,
}

impl<E, S> IngestionPipeline<E, S>
where
    E: EmbeddingProvider,
    S: VectorStore,
{
    fn extract_config(provider: &E) -> EmbeddingConfig {
        EmbeddingConfig {
            model_name: provider.model_name().to_string(),
            dimension: provider.dimension(),
        }
    }

    fn resolve_batch_size(batch_size: Option<usize>) -> IngestionResult<usize> {
        match batch_size {
            Some(0) => Err(IngestionError::InvalidInput("batch size must be at least 1".to_string())),
            Some(n) => Ok(n),
            None => Ok(DEFAULT_BATCH_SIZE),
        }
    }

    /// Connect to an existing index.
    ///
    /// # Errors
    /// Returns `IngestionError::InvalidInput` if the index has no embedding
    /// configuration or if it was built with a different model or dimension.
    pub async fn connect(embedding_provider: E, storage: S, batch_size: Option<usize>) -> IngestionResult<Self> {
        let batch_size = Self::resolve_batch_size(batch_size)?;
        let stored_config = storage.get_config().await?.ok_or_else(|| {
            IngestionError::InvalidInput(
                "Index has no embedding configuration. Use initialize_new() for a new index.".to_string(),
            )
        })?;

        let provider_config = Self::extract_config(&embedding_provider);

        if provider_config.model_name != stored_config.model_name {
            return Err(IngestionError::InvalidInput(format!(
                "Embedding model mismatch: provider uses '{}' but index has '{}'",
                provider_config.model_name, stored_config.model_name
            )));
        }

        if provider_config.dimension != stored_config.dimension {
            return Err(IngestionError::InvalidInput(format!(
                "Embedding dimension mismatch: provider has {} but index has {}",
                provider_config.dimension, stored_config.dimension
            )));
        }

        info!(model = %stored_config.model_name, dimension = stored_config.dimension, "Connected to existing index");
        Ok(Self {
            embedding_provider,
            storage,
            batch_size,
        })
    }

    /// Initialize a fresh index for `embedding_provider`, discarding any
    /// previous contents.
    pub async fn initialize_new(embedding_provider: E, mut storage: S, batch_size: Option<usize>) -> IngestionResult<Self> {
        let batch_size = Self::resolve_batch_size(batch_size)?;
        storage.initialize().await?;
        storage.clear().await?;

        let config = Self::extract_config(&embedding_provider);
        storage.store_config(&config).await?;

        info!(model = %config.model_name, dimension = config.dimension, "Initialized new index");
        Ok(Self {
            embedding_provider,
            storage,
            batch_size,
        })
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Embed chunk texts in batches, preserving order.
    ///
    /// `progress` is called after each batch with `(embedded, total)`.
    pub async fn embed_chunks<F>(&self, chunks: &[Chunk], mut progress: F) -> IngestionResult<Vec<Vec<f32>>>
    where
        F: FnMut(usize, usize),
    {
        let total = chunks.len();
        let mut embeddings = Vec::with_capacity(total);

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| normalize_text(&c.text)).collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

            let vectors = self.embedding_provider.embed_batch(&refs).await?;
            if vectors.len() != batch.len() {
                return Err(IngestionError::Embedding(EmbeddingError::Other(format!(
                    "provider returned {} embeddings for {} texts",
                    vectors.len(),
                    batch.len()
                ))));
            }

            let expected = self.embedding_provider.dimension();
            if let Some(vector) = vectors.iter().find(|v| v.len() != expected) {
                return Err(IngestionError::Embedding(EmbeddingError::Other(format!(
                    "provider returned {}-dimensional embeddings, index expects {}",
                    vector.len(),
                    expected
                ))));
            }

            embeddings.extend(vectors);
            progress(embeddings.len(), total);
        }

        Ok(embeddings)
    }

    /// Embed `chunks` and write them in a single upsert.
    ///
    /// # Returns
    /// Number of chunks stored
    pub async fn ingest_chunks<F>(&mut self, chunks: &[Chunk], progress: F) -> IngestionResult<usize>
    where
        F: FnMut(usize, usize),
    {
        if chunks.is_empty() {
            return Ok(0);
        }

        let embeddings = self.embed_chunks(chunks, progress).await?;
        let stored = self.storage.upsert(chunks, &embeddings).await?;
        info!(stored, "Persisted chunks");
        Ok(stored)
    }

    /// Persist a prepared corpus and return the completed statistics.
    pub async fn ingest_corpus<F>(&mut self, corpus: PreparedCorpus, progress: F) -> IngestionResult<IngestionStats>
    where
        F: FnMut(usize, usize),
    {
        let mut stats = corpus.stats;
        stats.stored = self.ingest_chunks(&corpus.chunks, progress).await?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::citation::parse_citations;
    use crate::embedding::EmbeddingResult;
    use crate::extraction::test_pdf::write_pdf;
    use crate::models::{Metadata, MetadataValue, ScoredChunk, BIBTEX_CITATION, PAGE_NUM, PAPER_NAME};
    use crate::storage::{DistanceMetric, StorageResult};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const BIB: &str = r#"
        @article{smith2020,
          author = {Smith, John},
          title = {On Things},
          year = {2020},
        }
    "#;

    /// Mock embedding provider that records batch sizes.
    struct MockEmbeddingProvider {
        dimension: usize,
        model_name: String,
        batches: Arc<Mutex<Vec<usize>>>,
        fail_on: Option<String>,
        // Size of the vectors actually returned
        output_dimension: usize,
    }

    impl MockEmbeddingProvider {
        fn new(model_name: &str, dimension: usize) -> Self {
            Self {
                dimension,
                model_name: model_name.to_string(),
                batches: Arc::new(Mutex::new(Vec::new())),
                fail_on: None,
                output_dimension: dimension,
            }
        }

        fn failing_on(mut self, text: &str) -> Self {
            self.fail_on = Some(text.to_string());
            self
        }

        fn returning_dimension(mut self, dimension: usize) -> Self {
            self.output_dimension = dimension;
            self
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed(&self, _text: &str) -> EmbeddingResult<Vec<f32>> {
            Ok(vec![0.5; self.dimension])
        }

        async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.len());
            if let Some(fail) = &self.fail_on {
                if texts.iter().any(|t| t.contains(fail.as_str())) {
                    return Err(EmbeddingError::ApiError(format!("Failed on text containing '{}'", fail)));
                }
            }
            Ok(texts.iter().map(|_| vec![0.5; self.output_dimension]).collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }

    /// Mock store with in-memory state shared between clones.
    #[derive(Clone, Default)]
    struct MockStorage {
        state: Arc<Mutex<MockStorageState>>,
    }

    #[derive(Default)]
    struct MockStorageState {
        chunks: Vec<Chunk>,
        config: Option<EmbeddingConfig>,
        initialized: bool,
        cleared: bool,
        upsert_calls: usize,
    }

    impl MockStorage {
        fn with_config(self, config: EmbeddingConfig) -> Self {
            self.state.lock().unwrap().config = Some(config);
            self
        }

        fn with_chunk(self, chunk: Chunk) -> Self {
            self.state.lock().unwrap().chunks.push(chunk);
            self
        }
    }

    #[async_trait]
    impl VectorStore for MockStorage {
        async fn initialize(&mut self) -> StorageResult<()> {
            self.state.lock().unwrap().initialized = true;
            Ok(())
        }

        async fn clear(&mut self) -> StorageResult<()> {
            let mut state = self.state.lock().unwrap();
            state.cleared = true;
            state.chunks.clear();
            state.config = None;
            Ok(())
        }

        async fn store_config(&mut self, config: &EmbeddingConfig) -> StorageResult<()> {
            self.state.lock().unwrap().config = Some(config.clone());
            Ok(())
        }

        async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
            Ok(self.state.lock().unwrap().config.clone())
        }

        async fn upsert(&mut self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> StorageResult<usize> {
            if chunks.len() != embeddings.len() {
                return Err(StorageError::InvalidRecord("length mismatch".to_string()));
            }
            let mut state = self.state.lock().unwrap();
            state.upsert_calls += 1;
            state.chunks.extend_from_slice(chunks);
            Ok(chunks.len())
        }

        async fn query(&self, _embedding: &[f32], k: usize) -> StorageResult<Vec<ScoredChunk>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .chunks
                .iter()
                .take(k)
                .map(|chunk| ScoredChunk {
                    chunk: chunk.clone(),
                    score: 0.0,
                })
                .collect())
        }

        async fn count(&self) -> StorageResult<usize> {
            Ok(self.state.lock().unwrap().chunks.len())
        }

        fn distance_metric(&self) -> DistanceMetric {
            DistanceMetric::Cosine
        }
    }

    // ===== Test Helper Functions =====

    fn create_test_config(model: &str, dim: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            model_name: model.to_string(),
            dimension: dim,
        }
    }

    fn chunker(size: usize, overlap: usize) -> TextChunker {
        TextChunker::new(ChunkingConfig::new(size, overlap).unwrap())
    }

    fn test_chunks(n: usize) -> Vec<Chunk> {
        let mut metadata = Metadata::new();
        metadata.insert(PAPER_NAME, MetadataValue::Text("paper".to_string()));
        metadata.insert(PAGE_NUM, MetadataValue::Integer(1));
        chunker(10, 0).chunk_page(&"abcdefghij".repeat(n), &metadata)
    }

    // ===== Configuration Validation Tests =====

    #[tokio::test]
    async fn test_connect_with_matching_config() {
        let storage = MockStorage::default().with_config(create_test_config("test-model", 384));
        let provider = MockEmbeddingProvider::new("test-model", 384);
        assert!(IngestionPipeline::connect(provider, storage, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_with_model_name_mismatch() {
        let storage = MockStorage::default().with_config(create_test_config("model-a", 384));
        let provider = MockEmbeddingProvider::new("model-b", 384);

        match IngestionPipeline::connect(provider, storage, None).await {
            Err(IngestionError::InvalidInput(msg)) => assert!(msg.contains("model mismatch")),
            _ => panic!("Expected model mismatch"),
        }
    }

    #[tokio::test]
    async fn test_connect_with_dimension_mismatch() {
        let storage = MockStorage::default().with_config(create_test_config("test-model", 384));
        let provider = MockEmbeddingProvider::new("test-model", 768);

        match IngestionPipeline::connect(provider, storage, None).await {
            Err(IngestionError::InvalidInput(msg)) => assert!(msg.contains("dimension mismatch")),
            _ => panic!("Expected dimension mismatch"),
        }
    }

    #[tokio::test]
    async fn test_connect_with_missing_config() {
        let provider = MockEmbeddingProvider::new("test-model", 384);
        let result = IngestionPipeline::connect(provider, MockStorage::default(), None).await;
        assert!(matches!(result, Err(IngestionError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_zero_batch_size_rejected() {
        let provider = MockEmbeddingProvider::new("test-model", 4);
        let result = IngestionPipeline::initialize_new(provider, MockStorage::default(), Some(0)).await;
        assert!(matches!(result, Err(IngestionError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_initialize_new_storage() {
        let storage = MockStorage::default().with_chunk(test_chunks(1).remove(0));
        let state = Arc::clone(&storage.state);
        let provider = MockEmbeddingProvider::new("new-model", 512);

        IngestionPipeline::initialize_new(provider, storage, None).await.unwrap();

        let state = state.lock().unwrap();
        assert!(state.initialized);
        assert!(state.cleared);
        assert!(state.chunks.is_empty());
        assert_eq!(state.config, Some(create_test_config("new-model", 512)));
    }

    // ===== Batching and Persistence Tests =====

    #[tokio::test]
    async fn test_batch_processing_respects_batch_size() {
        let provider = MockEmbeddingProvider::new("test-model", 4);
        let batches = Arc::clone(&provider.batches);
        let storage = MockStorage::default();
        let state = Arc::clone(&storage.state);
        let mut pipeline = IngestionPipeline::initialize_new(provider, storage, Some(2)).await.unwrap();

        let mut progress = Vec::new();
        let stored = pipeline
            .ingest_chunks(&test_chunks(5), |done, total| progress.push((done, total)))
            .await
            .unwrap();

        assert_eq!(stored, 5);
        assert_eq!(batches.lock().unwrap().as_slice(), [2, 2, 1]);
        assert_eq!(progress, vec![(2, 5), (4, 5), (5, 5)]);
        assert_eq!(state.lock().unwrap().upsert_calls, 1);
    }

    #[tokio::test]
    async fn test_empty_input_skips_store() {
        let provider = MockEmbeddingProvider::new("test-model", 4);
        let storage = MockStorage::default();
        let state = Arc::clone(&storage.state);
        let mut pipeline = IngestionPipeline::initialize_new(provider, storage, None).await.unwrap();

        assert_eq!(pipeline.ingest_chunks(&[], |_, _| {}).await.unwrap(), 0);
        assert_eq!(state.lock().unwrap().upsert_calls, 0);
    }

    #[tokio::test]
    async fn test_embedding_error_stores_nothing() {
        let provider = MockEmbeddingProvider::new("test-model", 4).failing_on("abcdefghij");
        let storage = MockStorage::default();
        let state = Arc::clone(&storage.state);
        let mut pipeline = IngestionPipeline::initialize_new(provider, storage, None).await.unwrap();

        let result = pipeline.ingest_chunks(&test_chunks(3), |_, _| {}).await;
        assert!(matches!(result, Err(IngestionError::Embedding(_))));
        assert!(state.lock().unwrap().chunks.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_vector_size_fails_before_store() {
        let provider = MockEmbeddingProvider::new("compat-model", 1536).returning_dimension(768);
        let batches = Arc::clone(&provider.batches);
        let storage = MockStorage::default();
        let state = Arc::clone(&storage.state);
        let mut pipeline = IngestionPipeline::initialize_new(provider, storage, Some(2)).await.unwrap();

        let result = pipeline.ingest_chunks(&test_chunks(6), |_, _| {}).await;

        assert!(matches!(result, Err(IngestionError::Embedding(_))));
        assert_eq!(batches.lock().unwrap().len(), 1);
        assert_eq!(state.lock().unwrap().upsert_calls, 0);
    }

    // ===== Preparation Tests =====

    #[test]
    fn test_prepare_document_with_citation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("smith2020.pdf");
        write_pdf(&path, &["Intro text", "Conclusion text"]);
        let citations = parse_citations(BIB).unwrap();

        let prepared = prepare_document(&path, &citations, &chunker(1000, 0)).unwrap();

        assert_eq!(prepared.paper_name, "smith2020");
        assert_eq!(prepared.chunks.len(), 2);
        assert_eq!(prepared.stats.pages, 2);
        assert_eq!(prepared.stats.fields_dropped, 0);
        assert_eq!(prepared.stats.missing_citations, 0);
        for (i, chunk) in prepared.chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.paper_name(), Some("smith2020"));
            assert_eq!(chunk.metadata.page_num(), Some(i as u32 + 1));
            assert_eq!(chunk.metadata.citation().unwrap().key, "smith2020");
        }
        assert!(prepared.chunks[0].text.contains("Intro text"));
    }

    #[test]
    fn test_prepare_document_without_citation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doe2021.pdf");
        write_pdf(&path, &["Only page"]);

        let prepared = prepare_document(&path, &CitationMap::new(), &chunker(1000, 0)).unwrap();

        assert_eq!(prepared.chunks.len(), 1);
        assert_eq!(prepared.stats.missing_citations, 1);
        assert_eq!(prepared.stats.fields_dropped, 1);
        assert!(!prepared.chunks[0].metadata.contains_key(BIBTEX_CITATION));
    }

    #[test]
    fn test_prepare_document_skips_empty_pages() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gaps.pdf");
        write_pdf(&path, &["First", "", "Third"]);

        let prepared = prepare_document(&path, &CitationMap::new(), &chunker(1000, 0)).unwrap();
        assert_eq!(prepared.stats.pages, 3);
        assert_eq!(prepared.stats.empty_pages, 1);

        let pages: Vec<u32> = prepared
            .chunks
            .iter()
            .filter_map(|c| c.metadata.page_num())
            .collect();
        assert_eq!(pages, vec![1, 3]);
    }

    #[test]
    fn test_prepare_corpus_skips_bad_files() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("a.pdf");
        let broken = dir.path().join("b.pdf");
        let missing = dir.path().join("c.pdf");
        write_pdf(&good, &["Good page"]);
        std::fs::write(&broken, b"not a pdf").unwrap();

        let corpus = prepare_corpus(
            &[good, broken, missing],
            Arc::new(CitationMap::new()),
            chunker(1000, 0),
        );

        assert_eq!(corpus.stats.files_processed, 1);
        assert_eq!(corpus.stats.files_skipped, 2);
        assert_eq!(corpus.chunks.len(), 1);
        assert_eq!(corpus.stats.chunks, 1);
    }

    #[test]
    fn test_prepare_corpus_keeps_input_order() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..6)
            .map(|i| {
                let path = dir.path().join(format!("paper{}.pdf", i));
                write_pdf(&path, &[&format!("Text of paper {}", i)]);
                path
            })
            .collect();

        let corpus = prepare_corpus(&paths, Arc::new(CitationMap::new()), chunker(1000, 0));
        let names: Vec<&str> = corpus
            .chunks
            .iter()
            .filter_map(|c| c.metadata.paper_name())
            .collect();
        assert_eq!(names, vec!["paper0", "paper1", "paper2", "paper3", "paper4", "paper5"]);
    }

    #[tokio::test]
    async fn test_ingest_corpus_fills_stored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("smith2020.pdf");
        write_pdf(&path, &["Intro text", "Conclusion text"]);
        let citations = Arc::new(parse_citations(BIB).unwrap());
        let corpus = prepare_corpus(&[path], citations, chunker(1000, 0));

        let provider = MockEmbeddingProvider::new("test-model", 4);
        let mut pipeline = IngestionPipeline::initialize_new(provider, MockStorage::default(), None)
            .await
            .unwrap();
        let stats = pipeline.ingest_corpus(corpus, |_, _| {}).await.unwrap();

        assert_eq!(stats.stored, 2);
        assert_eq!(stats.chunks, 2);
        assert_eq!(pipeline.storage().count().await.unwrap(), 2);
    }

    #[test]
    fn test_prepare_corpus_skips_duplicate_identifier() {
        let dir = TempDir::new().unwrap();
        let lower = dir.path().join("smith2020.pdf");
        let upper = dir.path().join("smith2020.PDF");
        write_pdf(&lower, &["Lower case copy"]);
        write_pdf(&upper, &["Upper case copy"]);

        let paths = vec![lower, upper];
        let corpus = prepare_corpus(&paths, Arc::new(CitationMap::new()), chunker(1000, 0));

        assert_eq!(corpus.stats.files_processed, 1);
        assert_eq!(corpus.stats.files_skipped, 1);
        assert_eq!(corpus.chunks.len(), 1);
        assert!(corpus.chunks[0].text.contains("Lower case copy"));
    }

    #[test]
    fn test_stats_merge() {
        let mut total = IngestionStats::new();
        let one = IngestionStats {
            files_processed: 1,
            pages: 3,
            chunks: 5,
            ..IngestionStats::default()
        };
        total.merge(&one);
        total.merge(&one);
        assert_eq!(total.files_processed, 2);
        assert_eq!(total.pages, 6);
        assert_eq!(total.chunks, 10);
        assert_eq!(total.stored, 0);
    }
}
