//! Search binary entry point.
//!
//! Queries a pre-built index and prints ranked excerpts with their paper,
//! page and LaTeX citation. Runs a single query or an interactive REPL.
//!
//! # Examples
//!
//! Single query:
//! ```bash
//! search --query "attention mechanisms"
//! ```
//!
//! JSON output with LLM query rewriting:
//! ```bash
//! OPENAI_API_KEY=sk-... search --query "why do transformers work" --rewrite --format json
//! ```
//!
//! Interactive mode:
//! ```bash
//! search --interactive
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use citesearch::{
    citation::load_citations,
    config::{AppConfig, EmbeddingProviderKind},
    embedding::{AnyEmbeddingProvider, TimedEmbedding},
    generation::{openai::OpenAIChatGenerator, QueryRewriter, TextGenerator},
    models::{CitationMap, RelevanceLevel},
    presentation::{PresentedResult, Presenter, SearchSession},
    query::{QueryOutcome, QueryPipeline, SearchEngine, SearchQuery},
    storage::{sqlite::SqliteVectorStore, VectorStore},
    viewer::{open_or_log, ExternalViewer},
};
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Engine = QueryPipeline<TimedEmbedding<AnyEmbeddingProvider>, SqliteVectorStore>;

/// Output format for search results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table with colored relevance levels
    Table,
    /// Machine-readable JSON format
    Json,
}

/// Search CLI for querying the citation index
#[derive(Parser, Debug)]
#[command(
    name = "search",
    version,
    about = "Search academic papers by meaning and get page-level citations",
    long_about = "Query the citation index using semantic search. Supports single-query and \
                  interactive modes with table or JSON output.

EXAMPLES:
  Single query:
    search --query \"attention mechanisms\"

  Open the best hit in the PDF viewer:
    search --query \"dropout\" --open 1

  Write the LLM material bundle to a file:
    search --query \"dropout\" --material-out material.txt

  Interactive mode:
    search --interactive"
)]
struct Args {
    /// Configuration file (defaults to ./citesearch.toml if present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the vector index
    #[arg(long, value_name = "DIR")]
    index_dir: Option<PathBuf>,

    /// BibTeX file used to resolve citations
    #[arg(long, value_name = "FILE")]
    bibliography: Option<PathBuf>,

    /// Search query (required for single-query mode, omitted in interactive mode)
    #[arg(long, value_name = "TEXT", conflicts_with = "interactive")]
    query: Option<String>,

    /// Number of results to return
    #[arg(long, value_name = "N")]
    top_k: Option<usize>,

    /// Rewrite the query with an LLM before searching (requires OPENAI_API_KEY)
    #[arg(long)]
    rewrite: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Open the result with this rank in the document viewer
    #[arg(long, value_name = "RANK", conflicts_with = "interactive")]
    open: Option<usize>,

    /// Write the LLM material bundle for the results to this file
    #[arg(long, value_name = "FILE", conflicts_with = "interactive")]
    material_out: Option<PathBuf>,

    /// Embedding provider the index was built with
    #[arg(long, value_enum)]
    embedding_provider: Option<EmbeddingProviderKind>,

    /// Embedding model name (provider-dependent)
    #[arg(long, value_name = "MODEL")]
    embedding_model: Option<String>,

    /// FastEmbed model cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.index_dir {
            config.paths.index_dir = dir.clone();
        }
        if let Some(file) = &self.bibliography {
            config.paths.bibliography = file.clone();
        }
        if let Some(top_k) = self.top_k {
            config.query.top_k = top_k;
        }
        if self.rewrite {
            config.query.rewrite = true;
        }
        if let Some(provider) = self.embedding_provider {
            config.embedding.provider = provider;
        }
        if let Some(model) = &self.embedding_model {
            config.embedding.model = Some(model.clone());
        }
        if let Some(dir) = &self.cache_dir {
            config.embedding.cache_dir = Some(dir.clone());
        }
    }
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

/// Open the index and build the query pipeline
async fn create_engine(config: &AppConfig) -> Result<Engine> {
    let index_file = config.paths.index_dir.join(citesearch::storage::sqlite::INDEX_FILE_NAME);
    if !index_file.exists() {
        anyhow::bail!(
            "Index not found: {}\n\
             Please run the ingestion binary with --mode init-new first.",
            index_file.display()
        );
    }

    let storage = SqliteVectorStore::open(&config.paths.index_dir)
        .with_context(|| format!("Failed to open index in {}", config.paths.index_dir.display()))?;

    let chunk_count = storage.count().await.context("Failed to count chunks in index")?;
    if chunk_count == 0 {
        warn!("Index is empty; every search will return no results");
    }
    info!("Index contains {} chunks", chunk_count);

    let provider = AnyEmbeddingProvider::from_settings(&config.embedding)
        .context("Failed to initialize embedding provider")?;
    let embedder = TimedEmbedding::new(provider, Duration::from_secs(config.embedding.timeout_secs));

    let mut engine = QueryPipeline::connect(embedder, storage)
        .await
        .context("Query embedder does not match the index")?;

    if config.query.rewrite {
        match OpenAIChatGenerator::from_env(&config.query.api_base, config.query.rewrite_model.clone()) {
            Ok(generator) => {
                let generator: Box<dyn TextGenerator> = Box::new(generator);
                engine = engine.with_rewriter(QueryRewriter::new(
                    generator,
                    config.query.rewrite_instruction.clone(),
                    Duration::from_secs(config.query.rewrite_timeout_secs),
                ));
                info!(model = %config.query.rewrite_model, "Query rewriting enabled");
            }
            Err(e) => warn!(error = %e, "Query rewriting unavailable"),
        }
    }

    Ok(engine)
}

/// Citations for display; a missing bibliography only loses the references
fn load_citation_map(config: &AppConfig) -> CitationMap {
    match load_citations(&config.paths.bibliography) {
        Ok(citations) => {
            debug!(count = citations.len(), "Loaded citations");
            citations
        }
        Err(e) => {
            warn!(error = %e, "Continuing without bibliography");
            CitationMap::new()
        }
    }
}

/// Execute a search query
async fn execute_search(engine: &Engine, query_text: &str, top_k: usize, rewrite: bool) -> Result<QueryOutcome> {
    debug!("Executing search for query: {}", query_text);

    let query = SearchQuery::new(query_text, top_k).with_rewrite(rewrite && engine.can_rewrite());
    engine
        .search(&query)
        .await
        .with_context(|| format!("Failed to execute search for query: '{}'", query_text))
}

fn relevance_cell(relevance: RelevanceLevel) -> Cell {
    let (label, color) = match relevance {
        RelevanceLevel::Identical => ("IDENTICAL", Color::Green),
        RelevanceLevel::HighlySimilar => ("HIGHLY_SIMILAR", Color::Cyan),
        RelevanceLevel::Similar => ("SIMILAR", Color::Yellow),
        RelevanceLevel::Relevant => ("RELEVANT", Color::White),
    };
    Cell::new(label).fg(color)
}

/// Format results as a pretty table
fn format_results_table(results: &[PresentedResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Paper").add_attribute(Attribute::Bold),
        Cell::new("Page").add_attribute(Attribute::Bold),
        Cell::new("Excerpt").add_attribute(Attribute::Bold),
        Cell::new("Cite").add_attribute(Attribute::Bold),
        Cell::new("Relevance").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
    ]);

    for result in results {
        table.add_row(vec![
            Cell::new(result.rank),
            Cell::new(&result.paper_name),
            Cell::new(result.page_num),
            Cell::new(&result.excerpt),
            Cell::new(&result.latex_cite),
            relevance_cell(result.relevance),
            Cell::new(format!("{:.4}", result.score)),
        ]);
    }

    table.to_string()
}

/// Format results as JSON
fn format_results_json(results: &[PresentedResult]) -> Result<String> {
    serde_json::to_string_pretty(results).context("Failed to serialize results to JSON")
}

fn print_outcome(outcome: &QueryOutcome, results: &[PresentedResult], format: OutputFormat, elapsed: Duration) {
    if let Some(rewritten) = &outcome.rewritten {
        println!("Rewritten query: {}", rewritten);
    }
    match format {
        OutputFormat::Table => {
            println!("{}", format_results_table(results));
            println!("\nFound {} results in {:.2}s", results.len(), elapsed.as_secs_f64());
        }
        OutputFormat::Json => match format_results_json(results) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error formatting JSON: {}", e),
        },
    }
}

/// Display detailed view of a single result
fn display_result_detail(result: &PresentedResult) {
    println!("\n{}", "═".repeat(80));
    println!("Rank: {}", result.rank);
    println!("Paper: {}", result.paper_name);
    println!("Page: {}", result.page_num);
    if let Some(reference) = result.reference() {
        println!("Reference: {}", reference);
    }
    println!("Cite: {}", result.latex_cite);
    println!("Relevance: {:?}", result.relevance);
    println!("Score: {:.4}", result.score);
    if let Some(path) = &result.full_path {
        println!("File: {}", path.display());
    }
    println!("\n{}", result.text);
    println!("{}", "═".repeat(80));
}

fn display_citation(result: &PresentedResult) {
    println!("{}", result.latex_cite);
    match result.bibtex() {
        Some(bibtex) => println!("{}", bibtex),
        None => println!("(no BibTeX entry for {})", result.paper_name),
    }
}

fn open_result(viewer: &ExternalViewer, result: &PresentedResult) {
    match result.viewer_command() {
        Some(command) => {
            if open_or_log(viewer, &command) {
                println!("Opened {} at page {}", result.paper_name, result.page_num);
            } else {
                eprintln!("Could not open {}", result.paper_name);
            }
        }
        None => eprintln!("No file path stored for {}", result.paper_name),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  <query>          - Search the papers");
    println!("  /top N           - Set number of results to N");
    println!("  /format table    - Use table output format");
    println!("  /format json     - Use JSON output format");
    println!("  /rewrite on|off  - Toggle LLM query rewriting");
    println!("  /detail N        - Show full text of result rank N");
    println!("  /cite N          - Show LaTeX cite and BibTeX for result rank N");
    println!("  /open N          - Open result rank N in the document viewer");
    println!("  /material        - Print the LLM material bundle for the last search");
    println!("  /help            - Show this help");
    println!("  Ctrl+D or Ctrl+C - Exit");
}

fn parse_rank(parts: &[&str], usage: &str) -> Option<usize> {
    if parts.len() != 2 {
        eprintln!("Usage: {}", usage);
        return None;
    }
    match parts[1].parse::<usize>() {
        Ok(rank) if rank > 0 => Some(rank),
        _ => {
            eprintln!("Invalid rank: must be a positive integer");
            None
        }
    }
}

/// Run interactive REPL mode
async fn run_interactive(
    engine: Engine,
    citations: CitationMap,
    viewer: ExternalViewer,
    mut top_k: usize,
    mut rewrite: bool,
    mut format: OutputFormat,
) -> Result<()> {
    println!("Interactive Paper Search");
    print_help();
    println!();

    let mut rl = DefaultEditor::new().context("Failed to create readline editor")?;
    let presenter = Presenter::default();
    let mut session = SearchSession::new(Arc::new(citations));

    loop {
        let readline = rl.readline("Search> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line).ok();

                if line.starts_with('/') {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    match parts[0] {
                        "/help" => print_help(),
                        "/top" => {
                            if let Some(n) = parse_rank(&parts, "/top N") {
                                top_k = n;
                                println!("Set top-k to {}", top_k);
                            }
                        }
                        "/format" => match parts.get(1).copied() {
                            Some("table") => {
                                format = OutputFormat::Table;
                                println!("Set output format to table");
                            }
                            Some("json") => {
                                format = OutputFormat::Json;
                                println!("Set output format to JSON");
                            }
                            _ => eprintln!("Usage: /format [table|json]"),
                        },
                        "/rewrite" => match parts.get(1).copied() {
                            Some("on") if engine.can_rewrite() => {
                                rewrite = true;
                                println!("Query rewriting on");
                            }
                            Some("on") => eprintln!("Query rewriting is not configured (set OPENAI_API_KEY)"),
                            Some("off") => {
                                rewrite = false;
                                println!("Query rewriting off");
                            }
                            _ => eprintln!("Usage: /rewrite [on|off]"),
                        },
                        "/detail" | "/cite" | "/open" => {
                            let Some(rank) = parse_rank(&parts, &format!("{} N", parts[0])) else {
                                continue;
                            };
                            let Some(result) = session.result(&presenter, rank) else {
                                eprintln!(
                                    "Rank {} out of range (last search had {} results)",
                                    rank,
                                    session.last_results.len()
                                );
                                continue;
                            };
                            match parts[0] {
                                "/detail" => display_result_detail(&result),
                                "/cite" => display_citation(&result),
                                _ => open_result(&viewer, &result),
                            }
                        }
                        "/material" => match session.material() {
                            Some(material) => println!("{}", material),
                            None => eprintln!("No search yet"),
                        },
                        _ => eprintln!("Unknown command: {}. Type /help for available commands.", parts[0]),
                    }
                } else {
                    let start = Instant::now();
                    match execute_search(&engine, line, top_k, rewrite).await {
                        Ok(outcome) => {
                            let elapsed = start.elapsed();
                            session.record(outcome.clone());
                            print_outcome(&outcome, &session.presented(&presenter), format, elapsed);
                        }
                        Err(e) => eprintln!("Search failed: {:#}", e),
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        }
    }

    Ok(())
}

/// Run single-query mode
async fn run_single_query(
    engine: Engine,
    citations: CitationMap,
    viewer: ExternalViewer,
    args: &Args,
    query: &str,
    config: &AppConfig,
) -> Result<()> {
    let start = Instant::now();
    let outcome = execute_search(&engine, query, config.query.top_k, config.query.rewrite).await?;
    let elapsed = start.elapsed();

    let mut session = SearchSession::new(Arc::new(citations));
    session.record(outcome.clone());
    let presenter = Presenter::default();
    print_outcome(&outcome, &session.presented(&presenter), args.format, elapsed);

    if let Some(path) = &args.material_out {
        if let Some(material) = session.material() {
            std::fs::write(path, material)
                .with_context(|| format!("Failed to write material bundle to {}", path.display()))?;
            info!("Wrote material bundle to {}", path.display());
        }
    }

    if let Some(rank) = args.open {
        match session.result(&presenter, rank) {
            Some(result) => open_result(&viewer, &result),
            None => warn!("No result with rank {}", rank),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    if !args.interactive && args.query.is_none() {
        anyhow::bail!(
            "Either --query or --interactive must be specified.\n\
             Use --help for usage information."
        );
    }

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let engine = create_engine(&config).await?;
    let citations = load_citation_map(&config);
    let viewer = ExternalViewer::new(config.viewer.program.clone(), config.viewer.page_arg.clone());

    match &args.query {
        Some(query) if !args.interactive => {
            run_single_query(engine, citations, viewer, &args, query, &config).await?;
        }
        _ => {
            run_interactive(
                engine,
                citations,
                viewer,
                config.query.top_k,
                config.query.rewrite,
                args.format,
            )
            .await?;
        }
    }

    Ok(())
}
