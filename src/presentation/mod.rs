//! Presentation of search results.
//!
//! Turns ranked [`SearchResult`]s into display records with citations and
//! LaTeX cite commands, builds the material bundle handed to an LLM, and
//! produces [`ViewerCommand`]s without executing them.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::models::{latex_cite, CitationMap, CitationRecord, RelevanceLevel, SearchResult};
use crate::query::QueryOutcome;

/// Default excerpt length in characters.
pub const DEFAULT_EXCERPT_CHARS: usize = 200;

/// Request to open a document at a page. One-based page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ViewerCommand {
    OpenAtPage { path: PathBuf, page: u32 },
}

/// One search result ready for display.
#[derive(Debug, Clone, Serialize)]
pub struct PresentedResult {
    /// One-based position in the result list
    pub rank: usize,
    pub paper_name: String,
    pub page_num: u32,
    /// Chunk text, shortened to the presenter's excerpt length
    pub excerpt: String,
    /// Full chunk text
    pub text: String,
    pub score: f32,
    pub similarity: f32,
    pub relevance: RelevanceLevel,
    pub full_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation: Option<CitationRecord>,
    pub latex_cite: String,
}

impl PresentedResult {
    /// `Author (Year). Title.` if a citation is known.
    pub fn reference(&self) -> Option<String> {
        self.citation.as_ref().map(CitationRecord::short_reference)
    }

    /// Full BibTeX entry if a citation is known.
    pub fn bibtex(&self) -> Option<String> {
        self.citation.as_ref().map(CitationRecord::to_bibtex)
    }

    /// Command that opens the source document at this result's page.
    pub fn viewer_command(&self) -> Option<ViewerCommand> {
        self.full_path.as_ref().map(|path| ViewerCommand::OpenAtPage {
            path: path.clone(),
            page: self.page_num,
        })
    }
}

/// Renders search results.
#[derive(Debug, Clone)]
pub struct Presenter {
    excerpt_chars: usize,
}

impl Default for Presenter {
    fn default() -> Self {
        Self::new(DEFAULT_EXCERPT_CHARS)
    }
}

impl Presenter {
    pub fn new(excerpt_chars: usize) -> Self {
        Self { excerpt_chars }
    }

    /// Present `results` in order.
    ///
    /// The citation stored with the chunk wins; otherwise `citations` is
    /// consulted by paper name.
    pub fn present(&self, results: &[SearchResult], citations: &CitationMap) -> Vec<PresentedResult> {
        results
            .iter()
            .enumerate()
            .map(|(i, result)| self.present_one(i + 1, result, citations))
            .collect()
    }

    fn present_one(&self, rank: usize, result: &SearchResult, citations: &CitationMap) -> PresentedResult {
        let metadata = &result.chunk.metadata;
        let paper_name = metadata.paper_name().unwrap_or("unknown").to_string();
        let page_num = metadata.page_num().unwrap_or(0);
        let citation = metadata
            .citation()
            .or_else(|| citations.get(&paper_name).cloned());
        let latex = match &citation {
            Some(record) => record.latex_cite(page_num),
            None => latex_cite(&paper_name, page_num),
        };

        PresentedResult {
            rank,
            excerpt: excerpt(&result.chunk.text, self.excerpt_chars),
            text: result.chunk.text.clone(),
            score: result.score,
            similarity: result.similarity,
            relevance: result.relevance,
            full_path: metadata.full_path().map(PathBuf::from),
            citation,
            latex_cite: latex,
            paper_name,
            page_num,
        }
    }
}

/// First `max_chars` characters of `text` with whitespace collapsed.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Build the text handed to an LLM: the question, the rewritten query and
/// every result's full text, each fenced by START/END markers.
pub fn format_material_bundle(prompt: &str, rewritten: Option<&str>, results: &[SearchResult]) -> String {
    let mut out = format!("Question: {}\n", prompt);
    out.push_str("MATERIAL START: ");
    out.push_str(rewritten.unwrap_or(""));
    out.push_str("\nMATERIAL END\n");

    for (i, result) in results.iter().enumerate() {
        let n = i + 1;
        out.push_str(&format!("\nMATERIAL {} START:\n", n));
        out.push_str(&result.chunk.text);
        out.push_str(&format!("\nMATERIAL {} END\n", n));
    }
    out
}

/// State of an interactive search session.
#[derive(Debug, Clone)]
pub struct SearchSession {
    pub last_query: Option<String>,
    pub last_rewritten: Option<String>,
    pub last_results: Vec<SearchResult>,
    pub citations: Arc<CitationMap>,
}

impl SearchSession {
    pub fn new(citations: Arc<CitationMap>) -> Self {
        Self {
            last_query: None,
            last_rewritten: None,
            last_results: Vec::new(),
            citations,
        }
    }

    /// Replace the session's last search.
    pub fn record(&mut self, outcome: QueryOutcome) {
        self.last_query = Some(outcome.query);
        self.last_rewritten = outcome.rewritten;
        self.last_results = outcome.results;
    }

    pub fn has_results(&self) -> bool {
        !self.last_results.is_empty()
    }

    pub fn presented(&self, presenter: &Presenter) -> Vec<PresentedResult> {
        presenter.present(&self.last_results, &self.citations)
    }

    /// Result by one-based rank.
    pub fn result(&self, presenter: &Presenter, rank: usize) -> Option<PresentedResult> {
        let index = rank.checked_sub(1)?;
        let result = self.last_results.get(index)?;
        Some(presenter.present_one(rank, result, &self.citations))
    }

    /// Material bundle for the last search, if any.
    pub fn material(&self) -> Option<String> {
        let query = self.last_query.as_deref()?;
        Some(format_material_bundle(
            query,
            self.last_rewritten.as_deref(),
            &self.last_results,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Metadata, MetadataValue, BIBTEX_CITATION, FULL_PATH, PAGE_NUM, PAPER_NAME};
    use std::collections::BTreeMap;

    fn smith() -> CitationRecord {
        let mut fields = BTreeMap::new();
        fields.insert("author".to_string(), "Smith, J.".to_string());
        fields.insert("title".to_string(), "On Things".to_string());
        fields.insert("year".to_string(), "2020".to_string());
        CitationRecord {
            key: "smith2020".to_string(),
            entry_type: "article".to_string(),
            fields,
        }
    }

    fn result(paper: &str, page: i64, text: &str, with_citation: bool) -> SearchResult {
        let mut meta = Metadata::new();
        meta.insert(PAPER_NAME, MetadataValue::Text(paper.to_string()));
        meta.insert(PAGE_NUM, MetadataValue::Integer(page));
        meta.insert(FULL_PATH, MetadataValue::Text(format!("/papers/{}.pdf", paper)));
        if with_citation {
            let json = serde_json::to_string(&smith()).unwrap();
            meta.insert(BIBTEX_CITATION, MetadataValue::Text(json));
        }
        SearchResult::new(Chunk::new(format!("{}:{}:0", paper, page), text.to_string(), meta), 0.1, 0.9)
    }

    #[test]
    fn test_present_with_stored_citation() {
        let presented = Presenter::default().present(&[result("smith2020", 2, "Intro text", true)], &CitationMap::new());
        let first = &presented[0];

        assert_eq!(first.rank, 1);
        assert_eq!(first.paper_name, "smith2020");
        assert_eq!(first.page_num, 2);
        assert_eq!(first.latex_cite, "\\cite[p.~2]{smith2020}");
        assert_eq!(first.reference().as_deref(), Some("Smith, J. (2020). On Things."));
        assert!(first.bibtex().unwrap().starts_with("@article{smith2020,"));
    }

    #[test]
    fn test_present_falls_back_to_citation_map() {
        let mut citations = CitationMap::new();
        citations.insert("smith2020".to_string(), smith());

        let presented = Presenter::default().present(&[result("smith2020", 1, "x", false)], &citations);
        assert_eq!(presented[0].citation, Some(smith()));
    }

    #[test]
    fn test_present_without_citation() {
        let presented = Presenter::default().present(&[result("doe2021", 4, "x", false)], &CitationMap::new());
        assert!(presented[0].citation.is_none());
        assert!(presented[0].reference().is_none());
        assert_eq!(presented[0].latex_cite, "\\cite[p.~4]{doe2021}");
    }

    #[test]
    fn test_viewer_command_uses_same_page() {
        let presented = Presenter::default().present(&[result("smith2020", 3, "x", false)], &CitationMap::new());
        assert_eq!(
            presented[0].viewer_command(),
            Some(ViewerCommand::OpenAtPage {
                path: PathBuf::from("/papers/smith2020.pdf"),
                page: 3,
            })
        );
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("short\n text", 20), "short text");
        assert_eq!(excerpt("abcdefghij", 4), "abcd...");
        assert_eq!(excerpt("äöüß", 2), "äö...");
    }

    #[test]
    fn test_material_bundle() {
        let results = vec![result("a", 1, "first chunk", false), result("b", 2, "second chunk", false)];
        let bundle = format_material_bundle("What is X?", Some("X definition"), &results);

        assert!(bundle.starts_with("Question: What is X?\nMATERIAL START: X definition\nMATERIAL END\n"));
        assert!(bundle.contains("\nMATERIAL 1 START:\nfirst chunk\nMATERIAL 1 END\n"));
        assert!(bundle.contains("\nMATERIAL 2 START:\nsecond chunk\nMATERIAL 2 END\n"));
    }

    #[test]
    fn test_session_tracks_last_search() {
        let mut session = SearchSession::new(Arc::new(CitationMap::new()));
        assert!(session.material().is_none());
        assert!(!session.has_results());

        session.record(QueryOutcome {
            query: "intro".to_string(),
            rewritten: None,
            results: vec![result("a", 1, "one", false), result("a", 2, "two", false)],
        });

        let presenter = Presenter::default();
        assert!(session.has_results());
        assert_eq!(session.presented(&presenter).len(), 2);
        assert_eq!(session.result(&presenter, 2).unwrap().text, "two");
        assert!(session.result(&presenter, 0).is_none());
        assert!(session.result(&presenter, 3).is_none());
        assert!(session.material().unwrap().starts_with("Question: intro\n"));
    }
}
