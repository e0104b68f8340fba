//! PDF text extraction.
//!
//! Each source document yields one `(text, metadata)` pair per page. Page
//! numbers are assigned from [`PAGE_INDEX_BASE`] and increase by one per page,
//! independently of how the PDF numbers its page objects.

use std::path::{Path, PathBuf};

use lopdf::Document;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{CitationMap, CitationRecord, PageMetadata, PAGE_INDEX_BASE};

/// Errors that can occur while extracting a document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The source file does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The paper identifier could not be derived from the file name
    #[error("Cannot derive paper identifier from {0}")]
    MissingIdentifier(String),

    /// Another document in the corpus already uses this paper identifier
    #[error("Paper identifier '{identifier}' of {path} is already used by {first}")]
    DuplicateIdentifier {
        identifier: String,
        path: String,
        first: String,
    },

    /// The document could not be parsed
    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    /// Listing the corpus directory failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for extraction operations.
pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// One page of extracted text.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    /// Raw page text, empty if nothing could be extracted
    pub text: String,

    /// Page metadata
    pub metadata: PageMetadata,
}

/// Derive the paper identifier from a file name (the stem, minus extension).
pub fn paper_identifier(path: &Path) -> ExtractionResult<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ExtractionError::MissingIdentifier(path.display().to_string()))
}

/// List the PDF files of a corpus directory, sorted by file name.
pub fn discover_documents(dir: &Path) -> ExtractionResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ExtractionError::NotFound(dir.display().to_string()));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// An opened PDF ready for page-by-page extraction.
pub struct PdfDocument {
    document: Document,
    page_numbers: Vec<u32>,
    paper_name: String,
    full_path: PathBuf,
    citation: Option<CitationRecord>,
}

impl PdfDocument {
    /// Open a PDF and join in its citation record.
    ///
    /// # Errors
    /// - `ExtractionError::NotFound` if the file is missing
    /// - `ExtractionError::MissingIdentifier` if no identifier can be derived
    /// - `ExtractionError::Parse` if the file is not a readable PDF
    pub fn open(path: &Path, citations: &CitationMap) -> ExtractionResult<Self> {
        if !path.exists() {
            return Err(ExtractionError::NotFound(path.display().to_string()));
        }

        let paper_name = paper_identifier(path)?;
        let full_path = std::fs::canonicalize(path)?;

        let document = Document::load(&full_path).map_err(|e| ExtractionError::Parse {
            path: full_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();

        let citation = citations.get(&paper_name).cloned();
        if citation.is_none() {
            warn!(paper = %paper_name, path = %full_path.display(), "No BibTeX citation found");
        }

        debug!(
            paper = %paper_name,
            pages = page_numbers.len(),
            "Opened document"
        );

        Ok(Self {
            document,
            page_numbers,
            paper_name,
            full_path,
            citation,
        })
    }

    pub fn paper_name(&self) -> &str {
        &self.paper_name
    }

    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    pub fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    /// Lazily iterate the pages. Every call starts again from the first page.
    pub fn pages(&self) -> Pages<'_> {
        Pages {
            document: self,
            position: 0,
        }
    }

    fn page_text(&self, object_page_number: u32) -> String {
        match self.document.extract_text(&[object_page_number]) {
            Ok(text) => text,
            Err(e) => {
                debug!(
                    paper = %self.paper_name,
                    page = object_page_number,
                    error = %e,
                    "No extractable text on page"
                );
                String::new()
            }
        }
    }
}

/// Iterator over the pages of a [`PdfDocument`].
pub struct Pages<'a> {
    document: &'a PdfDocument,
    position: usize,
}

impl Iterator for Pages<'_> {
    type Item = ExtractedPage;

    fn next(&mut self) -> Option<Self::Item> {
        let object_page_number = *self.document.page_numbers.get(self.position)?;
        let page_num = PAGE_INDEX_BASE + self.position as u32;
        self.position += 1;

        Some(ExtractedPage {
            text: self.document.page_text(object_page_number),
            metadata: PageMetadata {
                paper_name: self.document.paper_name.clone(),
                page_num,
                full_path: self.document.full_path.clone(),
                citation: self.document.citation.clone(),
            },
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.document.page_numbers.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Pages<'_> {}

/// Open a document and collect all of its pages.
pub fn extract_pages(path: &Path, citations: &CitationMap) -> ExtractionResult<Vec<ExtractedPage>> {
    let document = PdfDocument::open(path, citations)?;
    Ok(document.pages().collect())
}

/// Helpers for building small PDFs in tests.
#[cfg(test)]
pub(crate) mod test_pdf {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::path::Path;

    /// Write a PDF with one page per entry of `pages`, each showing that text.
    pub fn write_pdf(path: &Path, pages: &[&str]) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids = Vec::new();
        for text in pages {
            let mut operations = vec![Operation::new("BT", vec![])];
            operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
            operations.push(Operation::new("Td", vec![72.into(), 700.into()]));
            if !text.is_empty() {
                operations.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
            }
            operations.push(Operation::new("ET", vec![]));
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }
}
