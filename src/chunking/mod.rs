//! Text chunking.
//!
//! Splits page text into fixed-size, overlapping windows measured in
//! characters. Consecutive windows share exactly `chunk_overlap` characters,
//! so the original text can always be reassembled from its chunks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Chunk, Metadata};

/// Invalid chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,

    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// Chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkingConfig {
    /// Create a validated configuration (`0 <= overlap < size`).
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::ZeroChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkingError::OverlapTooLarge {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// Splits text according to a [`ChunkingConfig`].
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    config: ChunkingConfig,
}

impl TextChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Lazily split `text` into overlapping segments.
    pub fn split<'a>(&self, text: &'a str) -> Segments<'a> {
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        Segments {
            text,
            boundaries,
            start: 0,
            done: text.is_empty(),
            config: self.config,
        }
    }

    /// Split one page and tag every segment with its own copy of `metadata`.
    ///
    /// Chunk ids are `{paper_name}:{page_num}:{seq}` with `seq` starting at 0.
    pub fn chunk_page(&self, text: &str, metadata: &Metadata) -> Vec<Chunk> {
        let paper = metadata.paper_name().unwrap_or("unknown");
        let page = metadata
            .page_num()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        self.split(text)
            .enumerate()
            .map(|(seq, segment)| {
                Chunk::new(
                    format!("{}:{}:{}", paper, page, seq),
                    segment.to_string(),
                    metadata.clone(),
                )
            })
            .collect()
    }
}

/// Iterator returned by [`TextChunker::split`].
pub struct Segments<'a> {
    text: &'a str,
    // Byte offset of every char boundary, plus the end of the text.
    boundaries: Vec<usize>,
    start: usize,
    done: bool,
    config: ChunkingConfig,
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let char_count = self.boundaries.len() - 1;
        let end = (self.start + self.config.chunk_size).min(char_count);
        let segment = &self.text[self.boundaries[self.start]..self.boundaries[end]];

        if end == char_count {
            self.done = true;
        } else {
            self.start += self.config.step();
        }

        Some(segment)
    }
}

/// Rebuild the original text from segments produced with `overlap`.
pub fn reassemble<S: AsRef<str>>(segments: &[S], overlap: usize) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let segment = segment.as_ref();
        if i == 0 {
            out.push_str(segment);
        } else {
            out.extend(segment.chars().skip(overlap));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetadataValue, PAGE_NUM, PAPER_NAME};

    fn chunker(size: usize, overlap: usize) -> TextChunker {
        TextChunker::new(ChunkingConfig::new(size, overlap).unwrap())
    }

    fn page_metadata() -> Metadata {
        let mut meta = Metadata::new();
        meta.insert(PAPER_NAME, MetadataValue::Text("smith2020".to_string()));
        meta.insert(PAGE_NUM, MetadataValue::Integer(2));
        meta
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(ChunkingConfig::new(0, 0), Err(ChunkingError::ZeroChunkSize));
        assert_eq!(
            ChunkingConfig::new(10, 10),
            Err(ChunkingError::OverlapTooLarge { size: 10, overlap: 10 })
        );
        assert!(ChunkingConfig::new(10, 9).is_ok());
        assert!(ChunkingConfig::new(1, 0).is_ok());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let segments: Vec<&str> = chunker(100, 10).split("Intro text").collect();
        assert_eq!(segments, vec!["Intro text"]);

        let exact: Vec<&str> = chunker(5, 2).split("abcde").collect();
        assert_eq!(exact, vec!["abcde"]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert_eq!(chunker(10, 2).split("").count(), 0);
        assert!(chunker(10, 2).chunk_page("", &page_metadata()).is_empty());
    }

    #[test]
    fn test_overlapping_windows() {
        let segments: Vec<&str> = chunker(4, 1).split("abcdefghij").collect();
        assert_eq!(segments, vec!["abcd", "defg", "ghij"]);

        let segments: Vec<&str> = chunker(4, 2).split("abcdefg").collect();
        assert_eq!(segments, vec!["abcd", "cdef", "efg"]);
    }

    #[test]
    fn test_consecutive_overlap_is_exact() {
        let text = "The quick brown fox jumps over the lazy dog, again and again.";
        let overlap = 5;
        let segments: Vec<&str> = chunker(12, overlap).split(text).collect();
        for pair in segments.windows(2) {
            let len = pair[0].chars().count();
            let tail: String = pair[0].chars().skip(len - overlap).collect();
            let head: String = pair[1].chars().take(overlap).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_round_trip() {
        let texts = [
            "a",
            "Intro text",
            "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod.",
            "Übergrößenträger — naïve café résumé, 日本語のテキスト",
        ];
        let configs = [(1, 0), (3, 1), (7, 0), (7, 6), (16, 4), (200, 50)];

        for text in texts {
            for (size, overlap) in configs {
                let segments: Vec<&str> = chunker(size, overlap).split(text).collect();
                assert!(segments.iter().all(|s| s.chars().count() <= size));
                assert_eq!(reassemble(&segments, overlap), text, "size={size} overlap={overlap}");
            }
        }
    }

    #[test]
    fn test_chunks_share_page_identity() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunker(8, 3).chunk_page(text, &page_metadata());
        assert!(chunks.len() > 1);

        for (seq, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.paper_name(), Some("smith2020"));
            assert_eq!(chunk.metadata.page_num(), Some(2));
            assert_eq!(chunk.id, format!("smith2020:2:{}", seq));
        }
    }

    #[test]
    fn test_chunk_metadata_is_independent() {
        let mut chunks = chunker(4, 0).chunk_page("abcdefgh", &page_metadata());
        chunks[0]
            .metadata
            .insert("note", MetadataValue::Text("edited".to_string()));

        assert!(chunks[0].metadata.contains_key("note"));
        assert!(!chunks[1].metadata.contains_key("note"));
    }
}
