//! Analyze binary entry point.
//!
//! This binary runs the full critique pipeline for one paper: it resolves the
//! paper's content, embeds and retrieves evidence, asks the configured LLM for
//! a structured critique and stores the result in the library database.
//!
//! # Examples
//!
//! Analyze an arXiv paper by URL:
//! ```bash
//! analyze --url https://arxiv.org/abs/2301.01234 --title "A Paper"
//! ```
//!
//! Analyze a local PDF with a local Ollama model:
//! ```bash
//! analyze --pdf ./paper.pdf --embedding-provider ollama --generation-provider ollama
//! ```
//!
//! Re-run a stored paper and print JSON:
//! ```bash
//! analyze --paper-id arxiv:2301.01234 --format json
//! ```

use std::path::PathBuf;
#[cfg(feature = "pdf")]
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use paper_critique::{
    config::AppConfig,
    embedding::{AnyEmbeddingProvider, EmbeddingProviderKind},
    generation::{AnyGenerationProvider, GenerationProviderKind},
    models::{PageText, PaperId, PaperMetadata, PrivacyMode, Severity, StoredAnalysis, Tone},
    pipeline::AnalysisPipeline,
    storage::SqliteStore,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Pipeline = AnalysisPipeline<AnyEmbeddingProvider, AnyGenerationProvider, SqliteStore>;

/// Output format for the finished analysis
#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Human-friendly tables per section
    Table,
    /// The stored analysis record as JSON
    Json,
}

/// Embedding backend selectable from the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmbeddingBackend {
    /// OpenAI embeddings API (requires OPENAI_API_KEY)
    Openai,
    /// Local Ollama server
    Ollama,
    /// In-process FastEmbed model (requires the local-embed feature)
    Local,
}

impl From<EmbeddingBackend> for EmbeddingProviderKind {
    fn from(backend: EmbeddingBackend) -> Self {
        match backend {
            EmbeddingBackend::Openai => EmbeddingProviderKind::OpenAi,
            EmbeddingBackend::Ollama => EmbeddingProviderKind::Ollama,
            EmbeddingBackend::Local => EmbeddingProviderKind::Local,
        }
    }
}

/// Generation backend selectable from the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum GenerationBackend {
    /// OpenAI chat completions (requires OPENAI_API_KEY)
    Openai,
    /// Local Ollama server
    Ollama,
}

impl From<GenerationBackend> for GenerationProviderKind {
    fn from(backend: GenerationBackend) -> Self {
        match backend {
            GenerationBackend::Openai => GenerationProviderKind::OpenAi,
            GenerationBackend::Ollama => GenerationProviderKind::Ollama,
        }
    }
}

/// Analyze CLI for generating evidence-grounded critiques
#[derive(Parser, Debug)]
#[command(
    name = "analyze",
    version,
    about = "Generate an evidence-grounded critique of a research paper",
    long_about = "Run the critique pipeline on a paper: chunk its text, embed the chunks, retrieve \
                  evidence for each critique task and ask an LLM for a structured, cited analysis.

EXAMPLES:
  arXiv paper by URL:
    analyze --url https://arxiv.org/abs/2301.01234 --title \"A Paper\"

  Local PDF, everything on Ollama:
    analyze --pdf ./paper.pdf --embedding-provider ollama --generation-provider ollama

  Plain text file in snippets mode with a critical tone:
    analyze --text notes.txt --privacy snippets --tone critical

  Stored paper, fresh extraction, JSON output:
    analyze --paper-id arxiv:2301.01234 --reextract --format json"
)]
#[command(group(ArgGroup::new("input").required(true).args(["url", "pdf", "text", "paper_id"])))]
struct AnalyzeArgs {
    /// Hosting-site URL (arXiv, OpenReview) or direct PDF link
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// PDF URL or local path to extract and analyze
    #[arg(long, value_name = "URL|PATH")]
    pdf: Option<String>,

    /// Plain text file analyzed as a single page
    #[arg(long, value_name = "FILE")]
    text: Option<PathBuf>,

    /// Id of a paper already in the library
    #[arg(long, value_name = "ID")]
    paper_id: Option<PaperId>,

    /// Paper title (used with --url)
    #[arg(long, value_name = "TEXT")]
    title: Option<String>,

    /// Paper author, repeatable (used with --url)
    #[arg(long = "author", value_name = "NAME")]
    authors: Vec<String>,

    /// Abstract used when no PDF text can be extracted (used with --url)
    #[arg(long = "abstract", value_name = "TEXT")]
    abstract_text: Option<String>,

    /// Drop stored chunks and embeddings before analyzing
    #[arg(long)]
    reextract: bool,

    /// Embedding backend (overrides the config file)
    #[arg(long, value_enum)]
    embedding_provider: Option<EmbeddingBackend>,

    /// Embedding model name (provider-dependent)
    #[arg(long, value_name = "MODEL")]
    embedding_model: Option<String>,

    /// Generation backend (overrides the config file)
    #[arg(long, value_enum)]
    generation_provider: Option<GenerationBackend>,

    /// Generation model name (provider-dependent)
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,

    /// Reviewer tone: critical, balanced or experimental
    #[arg(long, value_name = "TONE")]
    tone: Option<Tone>,

    /// How much paper text to share: abstract-only, snippets or full-text
    #[arg(long, value_name = "MODE")]
    privacy: Option<PrivacyMode>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Config file (defaults to the user config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file path (overrides the config file)
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Timeout in seconds for PDF downloads
    #[arg(long, value_name = "SECS", default_value = "60")]
    fetch_timeout: u64,

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

/// Merge command-line overrides into the loaded configuration
fn load_config(args: &AnalyzeArgs) -> Result<AppConfig> {
    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(backend) = args.embedding_provider {
        config.embedding.provider = backend.into();
    }
    if let Some(model) = &args.embedding_model {
        config.embedding.model = Some(model.clone());
    }
    if let Some(backend) = args.generation_provider {
        config.generation.provider = backend.into();
    }
    if let Some(model) = &args.model {
        config.generation.model = Some(model.clone());
    }
    if let Some(tone) = args.tone {
        config.analysis.tone = tone;
    }
    if let Some(privacy) = args.privacy {
        config.analysis.privacy_mode = privacy;
    }
    if let Some(db) = &args.db {
        config.database_path = db.clone();
    }
    // Provider switches on the command line may need env values the file lacked
    config.apply_env(|key| std::env::var(key).ok());

    debug!("Effective config: {:?}", config);
    Ok(config)
}

/// Build the pipeline from the effective configuration
fn create_pipeline(config: &AppConfig, args: &AnalyzeArgs, progress: &ProgressBar) -> Result<Pipeline> {
    let embedder = AnyEmbeddingProvider::from_config(&config.embedding).with_context(|| {
        format!("Failed to create {} embedding provider", config.embedding.provider.as_str())
    })?;
    let generator = AnyGenerationProvider::from_config(&config.generation).with_context(|| {
        format!("Failed to create {} generation provider", config.generation.provider.as_str())
    })?;
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    info!("Database path: {:?}", config.database_path);
    debug!("PDF fetch timeout: {}s", args.fetch_timeout);

    let observer = progress.clone();
    let pipeline = AnalysisPipeline::new(embedder, generator, store)
        .with_chunking(config.chunking.options())
        .with_tasks(config.retrieval.clone())
        .with_bounds(config.bounds)
        .with_observer(move |stage, paper_id| observer.set_message(format!("{} ({})", stage, paper_id)));

    #[cfg(feature = "pdf")]
    let pipeline = {
        let extractor = paper_critique::extraction::PdfUrlExtractor::init(Duration::from_secs(args.fetch_timeout))
            .context("Failed to initialize PDF extractor")?;
        pipeline.with_extractor(Arc::new(extractor))
    };
    Ok(pipeline)
}

/// Resolve the requested input and run the pipeline on it
async fn run_analysis(pipeline: &Pipeline, args: &AnalyzeArgs, config: &AppConfig) -> Result<StoredAnalysis> {
    let options = config.analysis;

    if let Some(url) = &args.url {
        let title = args.title.clone().unwrap_or_else(|| url.clone());
        let mut paper = PaperMetadata::from_url(url, title, args.authors.clone());
        if let Some(abstract_text) = &args.abstract_text {
            paper = paper.with_abstract(abstract_text.clone());
        }
        let paper = pipeline.record_paper_seen(paper).await.context("Failed to record paper")?;
        return analyze_stored(pipeline, &paper.paper_id, args.reextract, &options).await;
    }

    if let Some(paper_id) = &args.paper_id {
        return analyze_stored(pipeline, paper_id, args.reextract, &options).await;
    }

    if let Some(path) = &args.text {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read text file {:?}", path))?;
        let source = format!("file://{}", path.display());
        let pages = vec![PageText::new(1, text)];
        return pipeline
            .analyze_pdf_pages(&source, &pages, &options)
            .await
            .with_context(|| format!("Analysis failed for {:?}", path));
    }

    if let Some(pdf) = &args.pdf {
        return analyze_pdf(pipeline, pdf, args, &options).await;
    }

    anyhow::bail!("One of --url, --pdf, --text or --paper-id is required")
}

async fn analyze_stored(
    pipeline: &Pipeline,
    paper_id: &PaperId,
    reextract: bool,
    options: &paper_critique::AnalysisOptions,
) -> Result<StoredAnalysis> {
    if reextract {
        pipeline.reextract(paper_id).await.context("Failed to clear stored content")?;
    }
    pipeline
        .analyze_paper(paper_id, options)
        .await
        .with_context(|| format!("Analysis failed for {}", paper_id))
}

#[cfg(feature = "pdf")]
async fn analyze_pdf(
    pipeline: &Pipeline,
    pdf: &str,
    args: &AnalyzeArgs,
    options: &paper_critique::AnalysisOptions,
) -> Result<StoredAnalysis> {
    use paper_critique::extraction::{PageExtractor, PdfUrlExtractor};

    let extractor = PdfUrlExtractor::init(Duration::from_secs(args.fetch_timeout))
        .context("Failed to initialize PDF extractor")?;
    let document = extractor.extract(pdf).await.with_context(|| format!("Failed to extract {}", pdf))?;
    info!("Extracted {} pages from {}", document.pages.len(), pdf);

    let stored = pipeline
        .analyze_pdf_pages(pdf, &document.pages, options)
        .await
        .with_context(|| format!("Analysis failed for {}", pdf))?;

    let doc_title = document.metadata.and_then(|m| m.title).or_else(|| args.title.clone());
    if let Some(title) = doc_title {
        use paper_critique::storage::PaperStore;
        if let Some(mut paper) = pipeline.store().get_paper(&stored.paper_id).await? {
            paper.title = title;
            pipeline.store().save_paper(&paper).await?;
        }
    }
    Ok(stored)
}

#[cfg(not(feature = "pdf"))]
async fn analyze_pdf(
    _pipeline: &Pipeline,
    _pdf: &str,
    _args: &AnalyzeArgs,
    _options: &paper_critique::AnalysisOptions,
) -> Result<StoredAnalysis> {
    anyhow::bail!("PDF support is disabled; rebuild with --features pdf")
}

fn header(cells: &[&str]) -> Vec<Cell> {
    cells.iter().map(|c| Cell::new(*c).add_attribute(Attribute::Bold)).collect()
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn evidence_ids(evidence: &[paper_critique::models::EvidenceSpan]) -> String {
    evidence.iter().map(|e| e.chunk_id.as_str()).collect::<Vec<_>>().join("\n")
}

/// Render every section of the analysis as tables
fn format_analysis_table(stored: &StoredAnalysis) -> String {
    let analysis = &stored.analysis;
    let mut out = String::new();

    out.push_str(&format!("{}\n", analysis.paper.title));
    if !analysis.paper.authors.is_empty() {
        out.push_str(&format!("{}\n", analysis.paper.authors.join(", ")));
    }
    out.push('\n');
    for bullet in &analysis.summary_bullets {
        out.push_str(&format!("  • {}\n", bullet));
    }

    let mut claims = new_table();
    claims.set_header(header(&["#", "Key claim", "Evidence"]));
    for (idx, claim) in analysis.key_claims.iter().enumerate() {
        claims.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(&claim.claim),
            Cell::new(evidence_ids(&claim.evidence)),
        ]);
    }
    out.push_str(&format!("\nKey claims\n{}\n", claims));

    let mut issues = new_table();
    issues.set_header(header(&["Severity", "Issue", "Confidence", "Suggested check", "Evidence"]));
    for issue in &analysis.potential_issues {
        let color = match issue.severity {
            Severity::High => Color::Red,
            Severity::Med => Color::Yellow,
            Severity::Low => Color::Green,
        };
        issues.add_row(vec![
            Cell::new(issue.severity.as_str()).fg(color),
            Cell::new(&issue.issue),
            Cell::new(format!("{:.2}", issue.confidence)),
            Cell::new(issue.suggested_check.as_deref().unwrap_or("-")),
            Cell::new(evidence_ids(&issue.evidence)),
        ]);
    }
    out.push_str(&format!("\nPotential issues\n{}\n", issues));

    let mut ablations = new_table();
    ablations.set_header(header(&["Missing ablation", "Suggested experiment", "Evidence"]));
    for ablation in &analysis.missing_ablations {
        ablations.add_row(vec![
            Cell::new(&ablation.description),
            Cell::new(&ablation.suggested_experiment),
            Cell::new(evidence_ids(&ablation.evidence)),
        ]);
    }
    out.push_str(&format!("\nMissing ablations\n{}\n", ablations));

    let mut questions = new_table();
    questions.set_header(header(&["Question", "Evidence"]));
    for question in &analysis.questions {
        questions.add_row(vec![Cell::new(&question.question), Cell::new(evidence_ids(&question.evidence))]);
    }
    out.push_str(&format!("\nQuestions for the authors\n{}\n", questions));

    out.push_str("\nReplication checklist\n");
    for item in &analysis.replication_checklist {
        out.push_str(&format!("  [ ] {}\n", item));
    }
    out.push_str("\nTests to run next week\n");
    for item in &analysis.next_week_tests {
        out.push_str(&format!("  - {}\n", item));
    }
    out
}

/// Create the spinner that tracks pipeline stages
fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .expect("Invalid progress bar template"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AnalyzeArgs::parse();

    init_logging(&args.log_level).context("Failed to initialize logging")?;
    info!("Starting paper analysis");
    debug!("CLI arguments: {:?}", args);

    let start_time = Instant::now();
    let config = load_config(&args)?;

    let progress = create_spinner();
    progress.set_message("starting");
    let pipeline = create_pipeline(&config, &args, &progress)?;

    let result = run_analysis(&pipeline, &args, &config).await;
    progress.finish_and_clear();
    let stored = result?;

    match args.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&stored).context("Failed to serialize analysis to JSON")?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", format_analysis_table(&stored));

            let elapsed = start_time.elapsed();
            let meta = &stored.analysis.model_meta;
            println!("╔════════════════════════════════════════╗");
            println!("║      Analysis Completed                ║");
            println!("╠════════════════════════════════════════╣");
            println!("║ Paper: {:>31} ║", stored.paper_id.as_str().chars().take(31).collect::<String>());
            println!("║ Provider:             {:>16} ║", meta.provider);
            println!("║ Model:                {:>16} ║", meta.model.chars().take(16).collect::<String>());
            println!("║ Version:              {:>16} ║", stored.analysis_version);
            println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
            println!("╚════════════════════════════════════════╝");
        }
    }

    if stored.analysis.potential_issues.iter().any(|i| i.severity == Severity::High) {
        warn!("Analysis flagged high-severity issues for {}", stored.paper_id);
    }
    info!("Analysis pipeline completed successfully");
    Ok(())
}
