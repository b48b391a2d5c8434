//! Library binary entry point.
//!
//! This binary manages the paper library stored in the SQLite database:
//! listing papers, showing stored analyses, starring, tagging, linking related
//! papers and deleting records.
//!
//! # Examples
//!
//! List starred papers:
//! ```bash
//! library list --starred
//! ```
//!
//! Link two papers:
//! ```bash
//! library link arxiv:2301.01234 arxiv:2302.05678 contrast "Opposite findings"
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use paper_critique::{
    config::AppConfig,
    models::{now_millis, PaperId, PaperLink, PaperMetadata, RelationType, ANALYSIS_VERSION},
    storage::{PaperFilter, PaperStore, SqliteStore},
};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for listings
#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table
    Table,
    /// Machine-readable JSON format
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List papers, most recently opened first
    List {
        /// Only starred papers
        #[arg(long)]
        starred: bool,
        /// Only papers with a stored analysis
        #[arg(long)]
        analyzed: bool,
        /// Only papers carrying this tag
        #[arg(long, value_name = "TAG")]
        tag: Option<String>,
    },
    /// Show one paper with its stored analysis summary and links
    Show {
        paper_id: PaperId,
        /// Analysis version to look up
        #[arg(long, default_value = ANALYSIS_VERSION)]
        version: String,
    },
    /// Toggle the star on a paper
    Star { paper_id: PaperId },
    /// Add or remove tags on a paper
    Tag {
        paper_id: PaperId,
        #[arg(required = true)]
        tags: Vec<String>,
        /// Remove the given tags instead of adding them
        #[arg(long)]
        remove: bool,
    },
    /// Record a relation between two papers
    Link {
        from: PaperId,
        to: PaperId,
        /// similar-theme, method-analogy, contrast or citation-mention
        relation: RelationType,
        /// Why the papers are related
        #[arg(default_value = "")]
        rationale: String,
    },
    /// List relations touching a paper, newest first
    Links { paper_id: PaperId },
    /// Delete a paper with its chunks, embeddings, analyses and links
    Delete { paper_id: PaperId },
    /// Delete everything in the library
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
}

/// Library CLI for managing stored papers
#[derive(Parser, Debug)]
#[command(
    name = "library",
    version,
    about = "Manage the local paper library",
    long_about = "Inspect and curate papers recorded by the analysis pipeline.

EXAMPLES:
  Everything tagged 'reading-group' as JSON:
    library list --tag reading-group --format json

  Show a stored analysis:
    library show arxiv:2301.01234

  Star and tag a paper:
    library star arxiv:2301.01234
    library tag arxiv:2301.01234 transformers efficiency

  Wipe the library:
    library clear --yes"
)]
struct LibraryArgs {
    #[command(subcommand)]
    command: Command,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// Config file (defaults to the user config directory)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database file path (overrides the config file)
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
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

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max.saturating_sub(3)).collect::<String>())
    } else {
        text.to_string()
    }
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h).add_attribute(Attribute::Bold)).collect::<Vec<_>>());
    table
}

/// Format papers as a pretty table
fn format_papers_table(papers: &[PaperMetadata]) -> String {
    if papers.is_empty() {
        return "No papers found.".to_string();
    }

    let mut table = new_table(&["Paper", "Title", "Source", "Opened", "Last opened", "Status", "Tags"]);
    for paper in papers {
        let status = match (paper.starred, paper.analyzed) {
            (true, true) => Cell::new("★ analyzed").fg(Color::Green),
            (true, false) => Cell::new("★").fg(Color::Yellow),
            (false, true) => Cell::new("analyzed").fg(Color::Green),
            (false, false) => Cell::new("-"),
        };
        table.add_row(vec![
            Cell::new(truncate(paper.paper_id.as_str(), 28)),
            Cell::new(truncate(&paper.title, 60)),
            Cell::new(paper.source.as_str()),
            Cell::new(paper.open_count),
            Cell::new(format_timestamp(paper.last_opened_at)),
            status,
            Cell::new(paper.tags.join(", ")),
        ]);
    }
    table.to_string()
}

fn format_links_table(links: &[PaperLink]) -> String {
    if links.is_empty() {
        return "No links recorded.".to_string();
    }

    let mut table = new_table(&["From", "Relation", "To", "Rationale", "Created"]);
    for link in links {
        table.add_row(vec![
            Cell::new(link.from_paper_id.as_str()),
            Cell::new(link.relation_type.as_str()).fg(Color::Cyan),
            Cell::new(link.to_paper_id.as_str()),
            Cell::new(truncate(&link.rationale, 60)),
            Cell::new(format_timestamp(link.created_at)),
        ]);
    }
    table.to_string()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

async fn require_paper(store: &SqliteStore, paper_id: &PaperId) -> Result<PaperMetadata> {
    store
        .get_paper(paper_id)
        .await
        .with_context(|| format!("Failed to load paper {}", paper_id))?
        .with_context(|| format!("Paper not found: {}", paper_id))
}

async fn show_paper(store: &SqliteStore, paper_id: &PaperId, version: &str, format: &OutputFormat) -> Result<()> {
    let paper = require_paper(store, paper_id).await?;
    let analysis = store.get_analysis(paper_id, version).await.context("Failed to load analysis")?;
    let links = store.get_links(paper_id).await.context("Failed to load links")?;

    if let OutputFormat::Json = format {
        return print_json(&serde_json::json!({ "paper": paper, "analysis": analysis, "links": links }));
    }

    println!("\n{}", "═".repeat(80));
    println!("Paper: {}", paper.paper_id);
    println!("Title: {}", paper.title);
    if !paper.authors.is_empty() {
        println!("Authors: {}", paper.authors.join(", "));
    }
    println!("Source: {} ({})", paper.source.as_str(), paper.source_url);
    if let Some(pdf_url) = &paper.pdf_url {
        println!("PDF: {}", pdf_url);
    }
    println!(
        "Opened {} times, first {} / last {}",
        paper.open_count,
        format_timestamp(paper.first_seen_at),
        format_timestamp(paper.last_opened_at)
    );
    if !paper.tags.is_empty() {
        println!("Tags: {}", paper.tags.join(", "));
    }
    if let Some(abstract_text) = paper.abstract_content() {
        println!("\nAbstract:\n{}", abstract_text);
    }

    match analysis {
        Some(stored) => {
            let meta = &stored.analysis.model_meta;
            println!(
                "\nAnalysis v{} by {}/{} on {}:",
                stored.analysis_version,
                meta.provider,
                meta.model,
                format_timestamp(stored.created_at)
            );
            for bullet in &stored.analysis.summary_bullets {
                println!("  • {}", bullet);
            }
            println!(
                "  {} key claims, {} questions, {} missing ablations, {} potential issues",
                stored.analysis.key_claims.len(),
                stored.analysis.questions.len(),
                stored.analysis.missing_ablations.len(),
                stored.analysis.potential_issues.len()
            );
        }
        None => println!("\nNo analysis v{} stored.", version),
    }

    if !links.is_empty() {
        println!("\n{}", format_links_table(&links));
    }
    println!("{}", "═".repeat(80));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = LibraryArgs::parse();

    init_logging(&args.log_level).context("Failed to initialize logging")?;
    debug!("CLI arguments: {:?}", args);

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = &args.db {
        config.database_path = db.clone();
    }
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    info!("Database path: {:?}", config.database_path);

    match &args.command {
        Command::List { starred, analyzed, tag } => {
            let filter = PaperFilter { starred_only: *starred, analyzed_only: *analyzed, tag: tag.clone() };
            let papers = store.list_papers(&filter).await.context("Failed to list papers")?;
            match args.format {
                OutputFormat::Json => print_json(&papers)?,
                OutputFormat::Table => {
                    println!("{}", format_papers_table(&papers));
                    println!("{} papers", papers.len());
                }
            }
        }
        Command::Show { paper_id, version } => show_paper(&store, paper_id, version, &args.format).await?,
        Command::Star { paper_id } => {
            let mut paper = require_paper(&store, paper_id).await?;
            paper.starred = !paper.starred;
            store.save_paper(&paper).await.context("Failed to save paper")?;
            println!("{} {}", if paper.starred { "Starred" } else { "Unstarred" }, paper_id);
        }
        Command::Tag { paper_id, tags, remove } => {
            let mut paper = require_paper(&store, paper_id).await?;
            if *remove {
                paper.tags.retain(|existing| !tags.iter().any(|t| t.eq_ignore_ascii_case(existing)));
            } else {
                for tag in tags {
                    if !paper.tags.iter().any(|existing| existing.eq_ignore_ascii_case(tag)) {
                        paper.tags.push(tag.clone());
                    }
                }
            }
            store.save_paper(&paper).await.context("Failed to save paper")?;
            println!("{}: {}", paper_id, if paper.tags.is_empty() { "-".to_string() } else { paper.tags.join(", ") });
        }
        Command::Link { from, to, relation, rationale } => {
            if from == to {
                anyhow::bail!("Cannot link a paper to itself");
            }
            require_paper(&store, from).await?;
            if store.get_paper(to).await?.is_none() {
                warn!("Linking to {} which is not in the library", to);
            }
            let link = PaperLink {
                from_paper_id: from.clone(),
                to_paper_id: to.clone(),
                relation_type: *relation,
                rationale: rationale.clone(),
                created_at: now_millis(),
            };
            store.save_link(&link).await.context("Failed to save link")?;
            println!("Linked {} -[{}]-> {}", from, relation.as_str(), to);
        }
        Command::Links { paper_id } => {
            let links = store.get_links(paper_id).await.context("Failed to load links")?;
            match args.format {
                OutputFormat::Json => print_json(&links)?,
                OutputFormat::Table => println!("{}", format_links_table(&links)),
            }
        }
        Command::Delete { paper_id } => {
            if store.delete_paper(paper_id).await.context("Failed to delete paper")? {
                println!("Deleted {}", paper_id);
            } else {
                warn!("Paper {} was not in the library", paper_id);
                println!("Nothing to delete for {}", paper_id);
            }
        }
        Command::Clear { yes } => {
            if !yes {
                anyhow::bail!("Refusing to clear the library without --yes");
            }
            store.clear_all().await.context("Failed to clear library")?;
            println!("Library cleared");
        }
    }

    Ok(())
}
