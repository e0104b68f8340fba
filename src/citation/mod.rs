//! Bibliography loading.
//!
//! Parses a BibTeX file into a map from citation key to [`CitationRecord`].
//! The map is loaded once per process and shared read-only afterwards; a paper
//! without an entry simply has no citation.

use std::collections::BTreeMap;
use std::path::Path;

use biblatex::{Bibliography, ChunksExt};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{CitationMap, CitationRecord};

/// Errors that can occur while loading a bibliography.
#[derive(Debug, Error)]
pub enum CitationError {
    /// The bibliography file does not exist
    #[error("Bibliography not found: {0}")]
    NotFound(String),

    /// The bibliography file exists but could not be read
    #[error("Failed to read bibliography {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The bibliography is malformed
    #[error("Malformed bibliography: {0}")]
    Parse(String),
}

/// Result type for citation loading.
pub type CitationResult<T> = Result<T, CitationError>;

/// Load and parse a BibTeX file.
///
/// # Errors
/// - `CitationError::NotFound` if the file is missing
/// - `CitationError::Parse` if the file is not valid BibTeX
pub fn load_citations(path: &Path) -> CitationResult<CitationMap> {
    if !path.exists() {
        return Err(CitationError::NotFound(path.display().to_string()));
    }

    let source = std::fs::read_to_string(path).map_err(|source| CitationError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let citations = parse_citations(&source)?;
    info!(path = %path.display(), entries = citations.len(), "Loaded bibliography");
    Ok(citations)
}

/// Parse BibTeX source into a citation map.
///
/// Field names are lowercased; field values are rendered verbatim with braces
/// and string abbreviations resolved.
pub fn parse_citations(source: &str) -> CitationResult<CitationMap> {
    let bibliography =
        Bibliography::parse(source).map_err(|e| CitationError::Parse(e.to_string()))?;

    let mut citations = CitationMap::new();
    for entry in bibliography.iter() {
        let fields: BTreeMap<String, String> = entry
            .fields
            .iter()
            .map(|(name, value)| (name.to_lowercase(), value.format_verbatim()))
            .collect();

        debug!(key = %entry.key, fields = fields.len(), "Parsed bibliography entry");

        citations.insert(
            entry.key.clone(),
            CitationRecord {
                key: entry.key.clone(),
                entry_type: entry.entry_type.to_string().to_lowercase(),
                fields,
            },
        );
    }

    Ok(citations)
}
