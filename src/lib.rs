//! Paper Critique - evidence-grounded critiques of research papers.
//!
//! This library turns a paper's text into a structured critique whose every
//! claim, question, missing ablation and issue cites the chunk it came from.
//!
//! # Architecture
//!
//! The system is organized into several key modules:
//!
//! - **models**: Core data structures (PaperMetadata, Chunk, Analysis, etc.)
//! - **chunking**: Token-budgeted text splitting with section detection
//! - **embedding**: Chunk embedding providers and the paper centroid
//! - **retrieval**: Cosine ranking and per-task evidence selection
//! - **generation**: Prompt construction, LLM backends and response validation
//! - **storage**: Paper library persistence (in-memory and SQLite)
//! - **extraction**: PDF page text extraction
//! - **pipeline**: The orchestrator tying the stages together
//! - **config**: TOML and environment configuration for the binaries
//!
//! # Workflow
//!
//! 1. Record the paper and resolve its content (stored chunks, PDF pages or abstract)
//! 2. Chunk the text and embed every chunk
//! 3. Average the chunk vectors into a centroid and retrieve top chunks per task
//! 4. Prompt the LLM with the retrieved evidence and validate the JSON reply
//! 5. Store the analysis and mark the paper analyzed
//!
//! # Example
//!
//! ```ignore
//! use paper_critique::{
//!     embedding::openai::OpenAIEmbedding,
//!     generation::openai::OpenAIGeneration,
//!     storage::SqliteStore,
//!     AnalysisOptions, AnalysisPipeline, PaperMetadata,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let embedder = OpenAIEmbedding::new(api_key.clone(), None)?;
//!     let generator = OpenAIGeneration::new(api_key, None)?;
//!     let store = SqliteStore::open("papers.db")?;
//!     let pipeline = AnalysisPipeline::new(embedder, generator, store);
//!
//!     let paper = PaperMetadata::from_url("https://arxiv.org/abs/2301.01234", "A Paper", vec![])
//!         .with_abstract("We propose ...");
//!     pipeline.record_paper_seen(paper.clone()).await?;
//!     let stored = pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await?;
//!
//!     for claim in &stored.analysis.key_claims {
//!         println!("{} ({} evidence spans)", claim.claim, claim.evidence.len());
//!     }
//!     Ok(())
//! }
//! ```

// Public modules
pub mod chunking;
pub mod config;
pub mod embedding;
pub mod extraction;
pub mod generation;
pub mod models;
pub mod pipeline;
pub mod retrieval;
pub mod storage;

// Re-export commonly used types at the crate root
pub use chunking::{chunk_pdf_pages, chunk_text, ChunkingOptions};
pub use config::AppConfig;
pub use embedding::{AnyEmbeddingProvider, EmbeddingProvider};
pub use generation::{AnyGenerationProvider, GenerationProvider};
pub use models::{
    Analysis, AnalysisOptions, Chunk, Embedding, PageText, PaperId, PaperMetadata, PrivacyMode, StoredAnalysis, Tone,
};
pub use pipeline::{AnalysisError, AnalysisPipeline, AnalysisStage};
pub use retrieval::{AnalysisTask, TaskRetrievalTable};
pub use storage::{MemoryStore, PaperStore, SqliteStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
