//! Ingest real PDFs into an on-disk index and search it back.

mod common;

use std::sync::Arc;

use citesearch::{
    citation::parse_citations,
    embedding::hashing::HashingEmbedding,
    extraction::discover_documents,
    ingestion::{prepare_corpus, prepare_document, IngestionPipeline},
    models::CitationMap,
    presentation::{Presenter, ViewerCommand},
    query::{QueryError, QueryPipeline, SearchEngine, SearchQuery},
    storage::{sqlite::SqliteVectorStore, VectorStore},
    ChunkingConfig, TextChunker,
};
use tempfile::TempDir;

use common::{write_pdf, LogCapture, SMITH_BIB};

fn chunker() -> TextChunker {
    TextChunker::new(ChunkingConfig::new(1000, 100).unwrap())
}

async fn build_index(papers: &TempDir, index: &TempDir, citations: CitationMap) -> SqliteVectorStore {
    let documents = discover_documents(papers.path()).unwrap();
    let corpus = prepare_corpus(&documents, Arc::new(citations), chunker());

    let store = SqliteVectorStore::open(index.path()).unwrap();
    let mut pipeline = IngestionPipeline::initialize_new(HashingEmbedding::default(), store, None)
        .await
        .unwrap();
    pipeline.ingest_corpus(corpus, |_, _| {}).await.unwrap();
    pipeline.into_storage()
}

#[tokio::test]
async fn test_cited_paper_ranks_matching_page_first() {
    let papers = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_pdf(&papers.path().join("smith2020.pdf"), &["Intro text", "Conclusion text"]);
    let citations = parse_citations(SMITH_BIB).unwrap();

    let store = build_index(&papers, &index, citations.clone()).await;
    assert_eq!(store.count().await.unwrap(), 2);

    let engine = QueryPipeline::connect(HashingEmbedding::default(), store).await.unwrap();
    let outcome = engine.search(&SearchQuery::new("Intro text", 2)).await.unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results[0].chunk.text.contains("Intro text"));
    assert!(outcome.results[1].chunk.text.contains("Conclusion text"));
    assert!(outcome.results[0].similarity >= outcome.results[1].similarity);

    let presented = Presenter::default().present(&outcome.results, &CitationMap::new());
    let best = &presented[0];
    assert_eq!(best.paper_name, "smith2020");
    assert_eq!(best.page_num, 1);
    assert_eq!(best.latex_cite, "\\cite[p.~1]{smith2020}");
    assert_eq!(best.citation.as_ref().map(|c| c.key.as_str()), Some("smith2020"));
    assert!(matches!(
        best.viewer_command(),
        Some(ViewerCommand::OpenAtPage { page: 1, .. })
    ));
    assert_eq!(presented[1].page_num, 2);
}

#[tokio::test]
async fn test_paper_without_citation_is_still_searchable() {
    let papers = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_pdf(&papers.path().join("doe2021.pdf"), &["Uncited findings"]);
    let citations = parse_citations(SMITH_BIB).unwrap();

    let store = build_index(&papers, &index, citations.clone()).await;
    let engine = QueryPipeline::connect(HashingEmbedding::default(), store).await.unwrap();
    let outcome = engine.search(&SearchQuery::new("uncited findings", 3)).await.unwrap();

    assert_eq!(outcome.results.len(), 1);
    let presented = Presenter::default().present(&outcome.results, &citations);
    assert!(presented[0].citation.is_none());
    assert_eq!(presented[0].latex_cite, "\\cite[p.~1]{doe2021}");
}

#[test]
fn test_missing_citation_is_logged() {
    let papers = TempDir::new().unwrap();
    let path = papers.path().join("doe2021.pdf");
    write_pdf(&path, &["Uncited findings"]);
    let citations = parse_citations(SMITH_BIB).unwrap();

    let logs = LogCapture::default();
    let prepared = logs.run(|| prepare_document(&path, &citations, &chunker()).unwrap());

    assert_eq!(prepared.stats.missing_citations, 1);
    let output = logs.contents();
    assert!(output.contains("WARN"), "{}", output);
    assert!(output.contains("No BibTeX citation found"), "{}", output);
    assert!(output.contains("doe2021"), "{}", output);
}

#[tokio::test]
async fn test_same_stem_files_do_not_overwrite_each_other() {
    let papers = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_pdf(&papers.path().join("smith2020.pdf"), &["Lower case copy"]);
    write_pdf(&papers.path().join("smith2020.PDF"), &["Upper case copy"]);

    let documents = discover_documents(papers.path()).unwrap();
    assert_eq!(documents.len(), 2);
    let corpus = prepare_corpus(&documents, Arc::new(CitationMap::new()), chunker());
    assert_eq!(corpus.stats.files_skipped, 1);

    let store = SqliteVectorStore::open(index.path()).unwrap();
    let mut pipeline = IngestionPipeline::initialize_new(HashingEmbedding::default(), store, None)
        .await
        .unwrap();
    let stats = pipeline.ingest_corpus(corpus, |_, _| {}).await.unwrap();

    assert_eq!(stats.stored, 1);
    assert_eq!(pipeline.storage().count().await.unwrap(), stats.stored);
}

#[tokio::test]
async fn test_empty_index_returns_no_results() {
    let papers = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();

    let store = build_index(&papers, &index, CitationMap::new()).await;
    let engine = QueryPipeline::connect(HashingEmbedding::default(), store).await.unwrap();
    let outcome = engine.search(&SearchQuery::new("anything", 5)).await.unwrap();

    assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn test_index_rejects_other_embedder() {
    let papers = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_pdf(&papers.path().join("smith2020.pdf"), &["Intro text"]);

    build_index(&papers, &index, CitationMap::new()).await;

    let reopened = SqliteVectorStore::open(index.path()).unwrap();
    let result = QueryPipeline::connect(HashingEmbedding::new(64), reopened).await;
    assert!(matches!(result, Err(QueryError::IncompatibleIndex(_))));
}
