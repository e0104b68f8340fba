//! Core data models for the citesearch pipeline.
//!
//! This module contains the data structures shared across ingestion and
//! retrieval: citation records, page metadata, the validated metadata map that
//! travels with every chunk, and search results.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Metadata key holding the paper identifier.
pub const PAPER_NAME: &str = "paper_name";

/// Metadata key holding the one-based page number.
pub const PAGE_NUM: &str = "page_num";

/// Metadata key holding the absolute path of the source document.
pub const FULL_PATH: &str = "full_path";

/// Metadata key holding the serialized citation record.
pub const BIBTEX_CITATION: &str = "bibtex_citation";

/// Page numbers are one-based everywhere: extraction, storage, presentation
/// and the viewer all use the same convention.
pub const PAGE_INDEX_BASE: u32 = 1;

/// A single bibliography entry, keyed by its citation identifier.
///
/// Records are loaded once at start-up and shared read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CitationRecord {
    /// Citation key (equals the paper file stem)
    pub key: String,

    /// BibTeX entry type, e.g. `article` or `inproceedings`
    pub entry_type: String,

    /// Bibliographic fields (`author`, `title`, `year`, ...), lowercase keys
    pub fields: BTreeMap<String, String>,
}

impl CitationRecord {
    /// Look up a field by its (lowercase) name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Render the record back into BibTeX source.
    pub fn to_bibtex(&self) -> String {
        let mut out = format!("@{}{{{},\n", self.entry_type, self.key);
        for (name, value) in &self.fields {
            out.push_str(&format!("  {} = {{{}}},\n", name, value));
        }
        out.push('}');
        out
    }

    /// LaTeX citation command pointing at a specific page.
    pub fn latex_cite(&self, page: u32) -> String {
        latex_cite(&self.key, page)
    }

    /// Short human readable reference: `Author (Year). Title.`
    pub fn short_reference(&self) -> String {
        let mut out = String::new();
        if let Some(author) = self.field("author") {
            out.push_str(author);
        }
        if let Some(year) = self.field("year") {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&format!("({})", year));
        }
        if let Some(title) = self.field("title") {
            if !out.is_empty() {
                out.push_str(". ");
            }
            out.push_str(title);
            out.push('.');
        }
        if out.is_empty() {
            out = self.key.clone();
        }
        out
    }
}

/// `\cite[p.~{page}]{key}`
pub fn latex_cite(key: &str, page: u32) -> String {
    format!("\\cite[p.~{}]{{{}}}", page, key)
}

/// Map from citation key to citation record.
pub type CitationMap = BTreeMap<String, CitationRecord>;

/// Per-page metadata created during extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMetadata {
    /// Paper identifier derived from the file name
    pub paper_name: String,

    /// One-based page number
    pub page_num: u32,

    /// Absolute path of the source document
    pub full_path: PathBuf,

    /// Citation record, if the bibliography has one for this paper
    pub citation: Option<CitationRecord>,
}

impl PageMetadata {
    /// Convert into the raw, loosely typed map consumed by the validator.
    ///
    /// A missing citation is left out entirely so the validator reports it.
    pub fn to_raw(&self) -> RawMetadata {
        let mut raw = Map::new();
        raw.insert(PAPER_NAME.to_string(), json!(self.paper_name));
        raw.insert(PAGE_NUM.to_string(), json!(self.page_num));
        raw.insert(
            FULL_PATH.to_string(),
            json!(self.full_path.to_string_lossy()),
        );
        if let Some(citation) = &self.citation {
            raw.insert(
                BIBTEX_CITATION.to_string(),
                serde_json::to_value(citation).unwrap_or(Value::Null),
            );
        }
        raw
    }
}

/// Raw metadata before validation: arbitrary JSON values.
pub type RawMetadata = Map<String, Value>;

/// A scalar metadata value that can be persisted alongside a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            MetadataValue::Integer(i) => json!(i),
            MetadataValue::Float(f) => json!(f),
            MetadataValue::Text(s) => json!(s),
        }
    }
}

/// Validated, flat metadata stored with each chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: MetadataValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    pub fn paper_name(&self) -> Option<&str> {
        self.get(PAPER_NAME).and_then(MetadataValue::as_str)
    }

    pub fn page_num(&self) -> Option<u32> {
        self.get(PAGE_NUM)
            .and_then(MetadataValue::as_i64)
            .and_then(|n| u32::try_from(n).ok())
    }

    pub fn full_path(&self) -> Option<&str> {
        self.get(FULL_PATH).and_then(MetadataValue::as_str)
    }

    /// Citation record stored as a serialized string, if present and decodable.
    pub fn citation(&self) -> Option<CitationRecord> {
        self.get(BIBTEX_CITATION)
            .and_then(MetadataValue::as_str)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// Whether the chunk carrying this metadata may enter the vector store.
    pub fn is_storable(&self) -> bool {
        self.paper_name().is_some_and(|name| !name.trim().is_empty()) && self.page_num().is_some()
    }

    /// Convert back into a raw map, e.g. to re-run validation.
    pub fn to_raw(&self) -> RawMetadata {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

/// A bounded segment of one page's text with its own metadata snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic identifier: `{paper_name}:{page_num}:{seq}`
    pub id: String,

    /// Segment text
    pub text: String,

    /// Validated metadata (owned, never shared between chunks)
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(id: String, text: String, metadata: Metadata) -> Self {
        Self { id, text, metadata }
    }
}

/// A chunk returned by the vector store with its raw store score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Relevance classification for search results.
///
/// Chunks are categorized by their semantic similarity to the query,
/// allowing clients to understand the quality of matches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelevanceLevel {
    /// Extremely high similarity (cosine similarity > 0.95)
    Identical,

    /// Very high similarity (cosine similarity > 0.85)
    HighlySimilar,

    /// Moderate similarity (cosine similarity > 0.70)
    Similar,

    /// Lower similarity but still relevant
    Relevant,
}

impl RelevanceLevel {
    /// Determine relevance level from a cosine similarity score.
    pub fn from_similarity(similarity: f32) -> Self {
        if similarity > 0.95 {
            RelevanceLevel::Identical
        } else if similarity > 0.85 {
            RelevanceLevel::HighlySimilar
        } else if similarity > 0.70 {
            RelevanceLevel::Similar
        } else {
            RelevanceLevel::Relevant
        }
    }
}

/// A single ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matched chunk with its metadata
    pub chunk: Chunk,

    /// Raw store score (distance or similarity, see the store's metric)
    pub score: f32,

    /// Score converted to a cosine-like similarity for display
    pub similarity: f32,

    /// Categorical relevance classification
    pub relevance: RelevanceLevel,
}

impl SearchResult {
    pub fn new(chunk: Chunk, score: f32, similarity: f32) -> Self {
        Self {
            chunk,
            score,
            similarity,
            relevance: RelevanceLevel::from_similarity(similarity),
        }
    }
}

/// Configuration for the embedding model.
///
/// Stored alongside the index to keep ingestion and query-time embedding
/// consistent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingConfig {
    /// Name/identifier of the embedding model
    pub model_name: String,

    /// Dimension of the embedding vectors
    pub dimension: usize,
}
