//! Chunks binary entry point.
//!
//! This binary shows how a document would be split for analysis without
//! calling any embedding or generation backend. Useful for tuning chunk size
//! and overlap, and for checking which sections get detected.
//!
//! # Examples
//!
//! Chunk a local PDF:
//! ```bash
//! chunks --pdf paper.pdf
//! ```
//!
//! Chunk a text file with smaller chunks, as JSON:
//! ```bash
//! chunks --text paper.txt --chunk-size 400 --overlap 60 --format json
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use paper_critique::{
    chunking::{chunk_pdf_pages, chunk_text, ChunkMetadata, ChunkingOptions},
    config::AppConfig,
    models::{Chunk, PageText, PaperId},
};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for the chunk listing
#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// One table row per chunk with a text preview
    Table,
    /// Full chunk records as JSON
    Json,
}

/// Chunks CLI for inspecting document chunking offline
#[derive(Parser, Debug)]
#[command(
    name = "chunks",
    version,
    about = "Split a document into analysis chunks and list them",
    long_about = "Chunk a PDF or text file exactly as the analysis pipeline would and print the result. \
                  No embedding or LLM calls are made.

EXAMPLES:
  Local PDF:
    chunks --pdf paper.pdf

  Remote PDF, only the first 5 chunks:
    chunks --pdf https://arxiv.org/pdf/2301.01234.pdf --limit 5

  Text file with custom sizing as JSON:
    chunks --text paper.txt --chunk-size 400 --overlap 60 --format json"
)]
#[command(group(ArgGroup::new("input").required(true).args(["pdf", "text"])))]
struct ChunksArgs {
    /// PDF URL or local path
    #[arg(long, value_name = "URL|PATH")]
    pdf: Option<String>,

    /// Plain text file, chunked as a single unpaged text
    #[arg(long, value_name = "FILE")]
    text: Option<PathBuf>,

    /// Target chunk size in estimated tokens (overrides the config file)
    #[arg(long, value_name = "TOKENS")]
    chunk_size: Option<usize>,

    /// Overlap between consecutive chunks in estimated tokens
    #[arg(long, value_name = "TOKENS")]
    overlap: Option<usize>,

    /// Show at most this many chunks
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Characters of chunk text shown in the table
    #[arg(long, value_name = "CHARS", default_value = "80")]
    preview: usize,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Config file (defaults to the user config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

/// Initialize logging subsystem with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

fn chunking_options(args: &ChunksArgs) -> Result<ChunkingOptions> {
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let chunk_size = args.chunk_size.unwrap_or(config.chunking.chunk_size);
    let overlap = args.overlap.unwrap_or(config.chunking.overlap);
    if overlap >= chunk_size {
        anyhow::bail!("Overlap ({}) must be smaller than chunk size ({})", overlap, chunk_size);
    }
    Ok(ChunkingOptions::new(chunk_size, overlap))
}

#[cfg(feature = "pdf")]
async fn load_pdf_pages(pdf: &str) -> Result<Vec<PageText>> {
    use paper_critique::extraction::{PageExtractor, PdfUrlExtractor};

    let extractor =
        PdfUrlExtractor::init(std::time::Duration::from_secs(60)).context("Failed to initialize PDF extractor")?;
    let document = extractor.extract(pdf).await.with_context(|| format!("Failed to extract {}", pdf))?;
    if let Some(title) = document.metadata.as_ref().and_then(|m| m.title.as_deref()) {
        info!("Document title: {}", title);
    }
    Ok(document.pages)
}

#[cfg(not(feature = "pdf"))]
async fn load_pdf_pages(_pdf: &str) -> Result<Vec<PageText>> {
    anyhow::bail!("PDF support is disabled; rebuild with --features pdf")
}

/// Format chunks as a pretty table
fn format_chunks_table(chunks: &[Chunk], preview: usize) -> String {
    if chunks.is_empty() {
        return "No chunks produced.".to_string();
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Chunk").add_attribute(Attribute::Bold),
        Cell::new("Section").add_attribute(Attribute::Bold),
        Cell::new("Pages").add_attribute(Attribute::Bold),
        Cell::new("Tokens").add_attribute(Attribute::Bold),
        Cell::new("Text").add_attribute(Attribute::Bold),
    ]);

    for chunk in chunks {
        let section = match &chunk.section {
            Some(section) => Cell::new(section).fg(Color::Cyan),
            None => Cell::new("-"),
        };
        let flattened = chunk.text.split_whitespace().collect::<Vec<_>>().join(" ");
        let text = if flattened.chars().count() > preview {
            format!("{}...", flattened.chars().take(preview).collect::<String>())
        } else {
            flattened
        };

        table.add_row(vec![
            Cell::new(&chunk.chunk_id),
            section,
            Cell::new(chunk.page_label().unwrap_or_else(|| "-".to_string())),
            Cell::new(chunk.token_count.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())),
            Cell::new(text),
        ]);
    }

    table.to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ChunksArgs::parse();

    init_logging(&args.log_level).context("Failed to initialize logging")?;
    debug!("CLI arguments: {:?}", args);

    let start_time = Instant::now();
    let options = chunking_options(&args)?;

    let (source, mut chunks) = if let Some(pdf) = &args.pdf {
        let pages = load_pdf_pages(pdf).await?;
        let paper_id = PaperId::from_url(pdf);
        info!("Chunking {} pages from {}", pages.len(), pdf);
        (pdf.clone(), chunk_pdf_pages(&pages, paper_id.as_str(), &options))
    } else if let Some(path) = &args.text {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read text file {:?}", path))?;
        let source = path.display().to_string();
        let paper_id = PaperId::for_url_hash(&source);
        (source, chunk_text(&text, &options, &ChunkMetadata::for_paper(paper_id.as_str())))
    } else {
        anyhow::bail!("One of --pdf or --text is required");
    };

    let total = chunks.len();
    let total_tokens: usize = chunks.iter().filter_map(|c| c.token_count).sum();
    let sections = {
        let mut names: Vec<&str> = chunks.iter().filter_map(|c| c.section.as_deref()).collect();
        names.dedup();
        names.len()
    };
    if let Some(limit) = args.limit {
        chunks.truncate(limit);
    }

    match args.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&chunks).context("Failed to serialize chunks to JSON")?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", format_chunks_table(&chunks, args.preview));

            let elapsed = start_time.elapsed();
            println!("\n╔════════════════════════════════════════╗");
            println!("║      Chunking Completed                ║");
            println!("╠════════════════════════════════════════╣");
            println!("║ Chunks:               {:>16} ║", total);
            println!("║ Estimated tokens:     {:>16} ║", total_tokens);
            println!("║ Section runs:         {:>16} ║", sections);
            println!("║ Chunk size/overlap:   {:>16} ║", format!("{}/{}", options.chunk_size, options.overlap));
            println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
            println!("╚════════════════════════════════════════╝");
            debug!("Chunked {}", source);
        }
    }

    Ok(())
}
