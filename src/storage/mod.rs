//! Vector store abstraction and implementations.
//!
//! This module defines the interface for persisting chunks with their
//! embeddings and answering nearest-neighbour queries. The abstraction keeps
//! ingestion and search independent of the storage backend.

pub mod sqlite;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Chunk, EmbeddingConfig, ScoredChunk};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error
    #[error("Query execution failed: {0}")]
    QueryError(String),

    /// Data serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Schema or migration error
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// A record cannot enter the store
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Vector length disagrees with the index
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Other unexpected errors
    #[error("Unexpected storage error: {0}")]
    Other(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::QueryError(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// How the store orders its scores, most relevant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOrder {
    /// Lower score is better (distances)
    AscendingDistance,

    /// Higher score is better (similarities)
    DescendingSimilarity,
}

impl ScoreOrder {
    /// Compare two scores so that the more relevant one sorts first.
    pub fn compare(&self, a: f32, b: f32) -> Ordering {
        match self {
            ScoreOrder::AscendingDistance => a.total_cmp(&b),
            ScoreOrder::DescendingSimilarity => b.total_cmp(&a),
        }
    }
}

/// Distance function used by a vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, in `[0, 2]`
    #[default]
    Cosine,

    /// Euclidean distance
    L2,

    /// Dot product, higher is better
    InnerProduct,
}

impl DistanceMetric {
    /// Score `candidate` against `query`.
    pub fn score(&self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(query, candidate),
            DistanceMetric::L2 => query
                .iter()
                .zip(candidate)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt(),
            DistanceMetric::InnerProduct => query.iter().zip(candidate).map(|(a, b)| a * b).sum(),
        }
    }

    pub fn score_order(&self) -> ScoreOrder {
        match self {
            DistanceMetric::Cosine | DistanceMetric::L2 => ScoreOrder::AscendingDistance,
            DistanceMetric::InnerProduct => ScoreOrder::DescendingSimilarity,
        }
    }

    /// Convert a score into a similarity in roughly `[0, 1]` for display.
    pub fn similarity(&self, score: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - score,
            DistanceMetric::L2 => 1.0 / (1.0 + score),
            DistanceMetric::InnerProduct => score,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
            DistanceMetric::InnerProduct => "inner_product",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            "inner_product" | "ip" | "dot" => Ok(DistanceMetric::InnerProduct),
            other => Err(StorageError::SchemaError(format!("unknown distance metric: {}", other))),
        }
    }
}

/// Calculate cosine similarity between two vectors.
///
/// Returns 0.0 for vectors of different length or zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Trait for vector store backends.
///
/// Writes take `&mut self`, so one process holds at most one writer. Reads
/// take `&self` and may run concurrently.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create tables and indexes. Idempotent.
    async fn initialize(&mut self) -> StorageResult<()>;

    /// Remove every stored chunk and the embedding configuration.
    async fn clear(&mut self) -> StorageResult<()>;

    /// Persist the embedding configuration used to build the index.
    async fn store_config(&mut self, config: &EmbeddingConfig) -> StorageResult<()>;

    /// Retrieve the embedding configuration, or None if not set.
    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>>;

    /// Insert or replace chunks keyed by chunk id, all or nothing.
    ///
    /// # Errors
    /// `InvalidRecord` if the slices differ in length or a chunk's metadata
    /// lacks `paper_name`/`page_num`; `DimensionMismatch` if a vector does
    /// not match the stored configuration.
    async fn upsert(&mut self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> StorageResult<usize>;

    /// Return the `k` best matches, most relevant first per [`Self::distance_metric`].
    async fn query(&self, embedding: &[f32], k: usize) -> StorageResult<Vec<ScoredChunk>>;

    /// Number of stored chunks.
    async fn count(&self) -> StorageResult<usize>;

    fn distance_metric(&self) -> DistanceMetric;
}
