//! Analysis pipeline.
//!
//! This module drives a paper from raw content to a stored critique:
//! 1. Resolve content: stored chunks, extracted PDF pages, or the abstract
//! 2. Get or create chunk embeddings
//! 3. Compute the paper centroid and retrieve evidence per task
//! 4. Generate and validate the critique
//! 5. Persist it and mark the paper analyzed
//!
//! Failures before step 5 leave no analysis behind; a paper whose generation
//! fails can simply be analyzed again.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chunking::{chunk_pdf_pages, chunk_text, ChunkMetadata, ChunkingOptions};
use crate::embedding::{compute_centroid, mean_vector, EmbeddingError, EmbeddingProvider};
use crate::extraction::{ExtractionError, PageExtractor};
use crate::generation::{AnalysisBounds, GenerationError, GenerationProvider, PaperPrompt};
use crate::models::{
    now_millis, AnalysisOptions, Chunk, Embedding, ModelError, PageText, PaperId, PaperMetadata, PaperSource,
    StoredAnalysis,
};
use crate::retrieval::{retrieve_all, RetrievalError, TaskRetrievalTable};
use crate::storage::{PaperStore, StorageError};

/// Title given to PDFs analyzed without any hosting-site metadata.
pub const PDF_PLACEHOLDER_TITLE: &str = "PDF Document";

/// Errors that can occur while analyzing a paper.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// No library record for the requested id
    #[error("Paper not found: {0}")]
    PaperNotFound(PaperId),

    /// Neither full text nor an abstract could be chunked
    #[error("No content available to analyze")]
    NoContent,

    /// PDF extraction failed and the paper has no abstract
    #[error("Failed to extract PDF: {0}. No abstract available as fallback")]
    ExtractionFailed(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Invalid input: {0}")]
    Model(#[from] ModelError),
}

/// Result type for pipeline operations.
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Progress milestones reported to the stage observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisStage {
    Extraction,
    Embedding,
    Retrieval,
    Generation,
    Complete,
}

impl AnalysisStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStage::Extraction => "extraction",
            AnalysisStage::Embedding => "embedding",
            AnalysisStage::Retrieval => "retrieval",
            AnalysisStage::Generation => "generation",
            AnalysisStage::Complete => "complete",
        }
    }
}

impl std::fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked as a paper moves through the pipeline.
pub type StageObserver = Arc<dyn Fn(AnalysisStage, &PaperId) + Send + Sync>;

/// Orchestrates chunking, embedding, retrieval, generation and persistence.
///
/// # Example Usage
/// ```ignore
/// let pipeline = AnalysisPipeline::new(embedder, generator, store)
///     .with_extractor(Arc::new(PdfUrlExtractor::init(Duration::from_secs(60))?));
///
/// let paper = PaperMetadata::from_url("https://arxiv.org/abs/2301.01234", "A Paper", vec![]);
/// pipeline.record_paper_seen(paper.clone()).await?;
/// let stored = pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await?;
/// ```
pub struct AnalysisPipeline<E, G, S>
where
    E: EmbeddingProvider,
    G: GenerationProvider,
    S: PaperStore,
{
    embedding_provider: E,
    generation_provider: G,
    store: S,
    chunking: ChunkingOptions,
    tasks: TaskRetrievalTable,
    bounds: AnalysisBounds,
    extractor: Option<Arc<dyn PageExtractor>>,
    observer: Option<StageObserver>,
    reembed_for_centroid: bool,
}

impl<E, G, S> AnalysisPipeline<E, G, S>
where
    E: EmbeddingProvider,
    G: GenerationProvider,
    S: PaperStore,
{
    /// Create a pipeline with default chunking, task table and bounds, and
    /// no extractor.
    pub fn new(embedding_provider: E, generation_provider: G, store: S) -> Self {
        Self {
            embedding_provider,
            generation_provider,
            store,
            chunking: ChunkingOptions::default(),
            tasks: TaskRetrievalTable::default(),
            bounds: AnalysisBounds::default(),
            extractor: None,
            observer: None,
            reembed_for_centroid: false,
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingOptions) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_tasks(mut self, tasks: TaskRetrievalTable) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_bounds(mut self, bounds: AnalysisBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PageExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(AnalysisStage, &PaperId) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Embed chunk texts again for the centroid instead of averaging the
    /// stored vectors.
    pub fn with_reembed_for_centroid(mut self, reembed: bool) -> Self {
        self.reembed_for_centroid = reembed;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn embedding_provider(&self) -> &E {
        &self.embedding_provider
    }

    pub fn generation_provider(&self) -> &G {
        &self.generation_provider
    }

    fn notify(&self, stage: AnalysisStage, paper_id: &PaperId) {
        debug!("Paper {} entered stage {}", paper_id, stage);
        if let Some(observer) = &self.observer {
            observer(stage, paper_id);
        }
    }

    /// Record that a paper was opened.
    ///
    /// New papers are stored as given. Known papers keep their record and
    /// get `open_count` incremented and `last_opened_at` refreshed.
    ///
    /// # Errors
    /// Returns `AnalysisError::Storage` if the store fails
    pub async fn record_paper_seen(&self, metadata: PaperMetadata) -> AnalysisResult<PaperMetadata> {
        let paper = match self.store.get_paper(&metadata.paper_id).await? {
            Some(mut existing) => {
                existing.touch();
                debug!("Paper {} opened {} times", existing.paper_id, existing.open_count);
                existing
            }
            None => {
                info!("New paper {}: {}", metadata.paper_id, metadata.title);
                metadata
            }
        };
        self.store.save_paper(&paper).await?;
        Ok(paper)
    }

    /// Analyze pages a caller already extracted from the PDF at `url`.
    ///
    /// The paper id is derived from the URL hash. Existing chunks for that
    /// paper are replaced by the ones built from `pages`.
    ///
    /// # Errors
    /// - `AnalysisError::NoContent` if the pages produce no chunks
    /// - any embedding, retrieval, generation or storage error
    pub async fn analyze_pdf_pages(
        &self,
        url: &str,
        pages: &[PageText],
        options: &AnalysisOptions,
    ) -> AnalysisResult<StoredAnalysis> {
        let paper_id = PaperId::for_url_hash(url);
        let paper = match self.store.get_paper(&paper_id).await? {
            Some(paper) => paper,
            None => {
                let mut paper = PaperMetadata::new(paper_id.clone(), PDF_PLACEHOLDER_TITLE, url);
                paper.source = PaperSource::Pdf;
                paper.pdf_url = Some(url.to_string());
                self.store.save_paper(&paper).await?;
                paper
            }
        };

        let chunks = chunk_pdf_pages(pages, paper_id.as_str(), &self.chunking);
        info!("Chunked {} pages into {} chunks for {}", pages.len(), chunks.len(), paper_id);
        self.store.delete_chunks(&paper_id).await?;
        self.store.save_chunks(&chunks).await?;

        self.analyze_chunks(paper, chunks, options).await
    }

    /// Analyze a paper already recorded in the library.
    ///
    /// Stored chunks are reused. Without any, the PDF is extracted when the
    /// paper has one and an extractor is configured, falling back to the
    /// abstract if extraction fails.
    ///
    /// # Errors
    /// - `AnalysisError::PaperNotFound` if the paper is not in the store
    /// - `AnalysisError::ExtractionFailed` if extraction fails with no abstract
    /// - `AnalysisError::NoContent` if there is nothing to chunk
    /// - any embedding, retrieval, generation or storage error
    pub async fn analyze_paper(&self, paper_id: &PaperId, options: &AnalysisOptions) -> AnalysisResult<StoredAnalysis> {
        let paper = self
            .store
            .get_paper(paper_id)
            .await?
            .ok_or_else(|| AnalysisError::PaperNotFound(paper_id.clone()))?;

        let mut chunks = self.store.get_chunks(paper_id).await?;
        if chunks.is_empty() {
            self.notify(AnalysisStage::Extraction, paper_id);
            chunks = self.extract_content(&paper).await?;
            self.store.save_chunks(&chunks).await?;
        } else {
            debug!("Reusing {} stored chunks for {}", chunks.len(), paper_id);
        }

        self.analyze_chunks(paper, chunks, options).await
    }

    /// Drop stored chunks and embeddings so the next analysis re-extracts.
    ///
    /// # Errors
    /// Returns `AnalysisError::Storage` if the store fails
    pub async fn reextract(&self, paper_id: &PaperId) -> AnalysisResult<()> {
        self.store.delete_chunks(paper_id).await?;
        info!("Cleared stored content for {}", paper_id);
        Ok(())
    }

    async fn extract_content(&self, paper: &PaperMetadata) -> AnalysisResult<Vec<Chunk>> {
        let extractor = self.extractor.as_ref().filter(|extractor| extractor.is_ready());
        let pdf_source = matches!(paper.source, PaperSource::Arxiv | PaperSource::Openreview | PaperSource::Pdf);

        if let (Some(pdf_url), Some(extractor), true) = (paper.pdf_url.as_deref(), extractor, pdf_source) {
            match self.extract_pdf(paper, pdf_url, extractor.as_ref()).await {
                Ok(chunks) => return Ok(chunks),
                Err(e) => {
                    warn!("PDF extraction failed for {}: {}", paper.paper_id, e);
                    return match self.chunk_abstract(paper) {
                        Some(chunks) => {
                            info!("Using abstract-only content for {}", paper.paper_id);
                            Ok(chunks)
                        }
                        None => Err(AnalysisError::ExtractionFailed(e.to_string())),
                    };
                }
            }
        }

        self.chunk_abstract(paper).ok_or(AnalysisError::NoContent)
    }

    async fn extract_pdf(
        &self,
        paper: &PaperMetadata,
        pdf_url: &str,
        extractor: &dyn PageExtractor,
    ) -> AnalysisResult<Vec<Chunk>> {
        info!("Extracting PDF for {} from {}", paper.paper_id, pdf_url);
        let document = extractor.extract(pdf_url).await?;
        if document.pages.is_empty() {
            return Err(ExtractionError::NoPages(pdf_url.to_string()).into());
        }

        let chunks = chunk_pdf_pages(&document.pages, paper.paper_id.as_str(), &self.chunking);
        if chunks.is_empty() {
            return Err(ExtractionError::Parse(format!("no chunks created from {}", pdf_url)).into());
        }

        if paper.title == PDF_PLACEHOLDER_TITLE {
            if let Some(title) = document.metadata.and_then(|m| m.title) {
                let mut titled = paper.clone();
                titled.title = title;
                self.store.save_paper(&titled).await?;
            }
        }

        info!("Extracted {} pages into {} chunks", document.pages.len(), chunks.len());
        Ok(chunks)
    }

    fn chunk_abstract(&self, paper: &PaperMetadata) -> Option<Vec<Chunk>> {
        let abstract_text = paper.abstract_content()?;
        let chunks = chunk_text(abstract_text, &self.chunking, &ChunkMetadata::for_paper(paper.paper_id.as_str()));
        if chunks.is_empty() {
            None
        } else {
            Some(chunks)
        }
    }

    async fn analyze_chunks(
        &self,
        mut paper: PaperMetadata,
        chunks: Vec<Chunk>,
        options: &AnalysisOptions,
    ) -> AnalysisResult<StoredAnalysis> {
        if chunks.is_empty() {
            return Err(AnalysisError::NoContent);
        }
        let paper_id = paper.paper_id.clone();

        self.notify(AnalysisStage::Embedding, &paper_id);
        let embeddings = self.embeddings_for(&paper_id, &chunks).await?;
        let centroid = if self.reembed_for_centroid {
            compute_centroid(&chunks, &self.embedding_provider).await?
        } else {
            let vectors: Vec<&[f32]> = chunks
                .iter()
                .filter_map(|chunk| embeddings.get(&chunk.chunk_id))
                .map(|embedding| embedding.vector.as_slice())
                .collect();
            mean_vector(&vectors)?
        };

        self.notify(AnalysisStage::Retrieval, &paper_id);
        let retrieved = retrieve_all(&self.tasks, &centroid, &chunks, &embeddings)?;

        self.notify(AnalysisStage::Generation, &paper_id);
        // Re-read so a placeholder title replaced during extraction reaches the prompt
        if let Some(latest) = self.store.get_paper(&paper_id).await? {
            paper = latest;
        }
        let prompt = PaperPrompt::from_metadata(&paper);
        let mut analysis = self
            .generation_provider
            .generate_analysis(&prompt, &retrieved, options, &self.bounds)
            .await?;

        if analysis.paper.id != paper_id.as_str() {
            warn!("Model returned paper id {:?}, correcting to {}", analysis.paper.id, paper_id);
            analysis.paper.id = paper_id.to_string();
        }

        let stored = StoredAnalysis {
            paper_id: paper_id.clone(),
            analysis_version: analysis.analysis_version.clone(),
            analysis,
            created_at: now_millis(),
        };
        self.store.save_analysis(&stored).await?;

        paper.analyzed = true;
        self.store.save_paper(&paper).await?;

        self.notify(AnalysisStage::Complete, &paper_id);
        info!("Analysis complete for {}", paper_id);
        Ok(stored)
    }

    /// Stored embeddings keyed by chunk id, embedding every chunk afresh
    /// unless all of them already have one.
    async fn embeddings_for(&self, paper_id: &PaperId, chunks: &[Chunk]) -> AnalysisResult<HashMap<String, Embedding>> {
        let stored: HashMap<String, Embedding> = self
            .store
            .get_embeddings(paper_id)
            .await?
            .into_iter()
            .map(|embedding| (embedding.chunk_id.clone(), embedding))
            .collect();
        let model = self.embedding_provider.model_name().to_string();
        let reusable = chunks
            .iter()
            .all(|chunk| stored.get(&chunk.chunk_id).is_some_and(|embedding| embedding.model == model));
        if reusable {
            debug!("Reusing {} stored embeddings for {}", stored.len(), paper_id);
            return Ok(stored);
        }
        if !stored.is_empty() {
            debug!("Stored embeddings for {} are incomplete or not from {}; re-embedding", paper_id, model);
        }

        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let vectors = self.embedding_provider.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(EmbeddingError::Other(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            ))
            .into());
        }

        let created_at = now_millis();
        let embeddings: Vec<Embedding> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| Embedding {
                paper_id: paper_id.to_string(),
                chunk_id: chunk.chunk_id.clone(),
                vector,
                model: model.clone(),
                created_at,
            })
            .collect();
        self.store.save_embeddings(&embeddings).await?;
        info!("Embedded {} chunks for {} with {}", embeddings.len(), paper_id, model);

        Ok(embeddings.into_iter().map(|embedding| (embedding.chunk_id.clone(), embedding)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{DocumentMetadata, ExtractedDocument, ExtractionResult};
    use crate::generation::response::tests::valid_analysis_json;
    use crate::generation::GenerationResult;
    use crate::models::{PrivacyMode, Tone};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    // ===== Mock Implementations =====

    #[derive(Debug, Default)]
    struct MockEmbeddingState {
        embed_batch_calls: Vec<Vec<String>>,
        should_fail: bool,
    }

    #[derive(Clone)]
    struct MockEmbeddingProvider {
        model_name: String,
        state: Arc<Mutex<MockEmbeddingState>>,
    }

    impl MockEmbeddingProvider {
        fn new() -> Self {
            Self { model_name: "mock-embed".to_string(), state: Arc::new(Mutex::new(MockEmbeddingState::default())) }
        }

        fn with_failure(self, should_fail: bool) -> Self {
            self.state.lock().unwrap().should_fail = should_fail;
            self
        }

        fn get_embed_batch_calls(&self) -> Vec<Vec<String>> {
            self.state.lock().unwrap().embed_batch_calls.clone()
        }

        /// Deterministic 3-d vector from the text length.
        fn vector_for(text: &str) -> Vec<f32> {
            let len = text.len() as f32;
            vec![1.0, len / 100.0, (len % 7.0) / 7.0]
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed(&self, text: &str) -> crate::embedding::EmbeddingResult<Vec<f32>> {
            Ok(Self::vector_for(text))
        }

        async fn embed_batch(&self, texts: &[&str]) -> crate::embedding::EmbeddingResult<Vec<Vec<f32>>> {
            let mut state = self.state.lock().unwrap();
            state.embed_batch_calls.push(texts.iter().map(|t| t.to_string()).collect());
            if state.should_fail {
                return Err(EmbeddingError::Api("Mock failure".to_string()));
            }
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }

    #[derive(Debug, Default)]
    struct MockGenerationState {
        prompts: Vec<String>,
        response: String,
    }

    #[derive(Clone)]
    struct MockGenerationProvider {
        state: Arc<Mutex<MockGenerationState>>,
    }

    impl MockGenerationProvider {
        fn returning(response: String) -> Self {
            Self { state: Arc::new(Mutex::new(MockGenerationState { prompts: Vec::new(), response })) }
        }

        fn valid_for(paper_id: &str) -> Self {
            let mut value = valid_analysis_json();
            value["paper"]["id"] = serde_json::Value::String(paper_id.to_string());
            Self::returning(value.to_string())
        }

        fn get_prompts(&self) -> Vec<String> {
            self.state.lock().unwrap().prompts.clone()
        }
    }

    #[async_trait]
    impl GenerationProvider for MockGenerationProvider {
        async fn complete(&self, _system: &str, prompt: &str) -> GenerationResult<String> {
            let mut state = self.state.lock().unwrap();
            state.prompts.push(prompt.to_string());
            Ok(state.response.clone())
        }

        fn provider_name(&self) -> &str {
            "mock"
        }

        fn model_name(&self) -> &str {
            "mock-llm"
        }
    }

    struct MockExtractor {
        result: Mutex<Option<ExtractionResult<ExtractedDocument>>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockExtractor {
        fn succeeding(pages: Vec<PageText>, title: Option<&str>) -> Self {
            let metadata = title.map(|t| DocumentMetadata { title: Some(t.to_string()), author: None });
            Self { result: Mutex::new(Some(Ok(ExtractedDocument { pages, metadata }))), calls: Mutex::new(Vec::new()) }
        }

        fn failing() -> Self {
            Self {
                result: Mutex::new(Some(Err(ExtractionError::Fetch("connection refused".to_string())))),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageExtractor for MockExtractor {
        async fn extract(&self, url: &str) -> ExtractionResult<ExtractedDocument> {
            self.calls.lock().unwrap().push(url.to_string());
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(ExtractionError::Fetch("already extracted".to_string())))
        }
    }

    // ===== Helpers =====

    const ARXIV_ID: &str = "arxiv:2301.01234";

    fn arxiv_paper() -> PaperMetadata {
        PaperMetadata::from_url("https://arxiv.org/abs/2301.01234", "A Paper", vec!["Ada".to_string()])
    }

    fn sample_pages() -> Vec<PageText> {
        vec![
            PageText::new(1, "Abstract\nWe propose a method that improves accuracy on three benchmarks."),
            PageText::new(2, "Method\nThe model uses a sparse attention layer trained for ten epochs."),
            PageText::new(3, "Results\nAccuracy improves by four points over the strongest baseline."),
        ]
    }

    fn pipeline_with(
        generator: MockGenerationProvider,
    ) -> AnalysisPipeline<MockEmbeddingProvider, MockGenerationProvider, MemoryStore> {
        AnalysisPipeline::new(MockEmbeddingProvider::new(), generator, MemoryStore::new())
    }

    // ===== Tests =====

    #[tokio::test]
    async fn test_record_paper_seen_increments_open_count() {
        let pipeline = pipeline_with(MockGenerationProvider::valid_for(ARXIV_ID));
        let paper = arxiv_paper();

        let first = pipeline.record_paper_seen(paper.clone()).await.unwrap();
        assert_eq!(first.open_count, 1);

        let second = pipeline.record_paper_seen(paper.clone()).await.unwrap();
        assert_eq!(second.open_count, 2);
        assert!(second.last_opened_at >= first.last_opened_at);
        assert_eq!(second.first_seen_at, first.first_seen_at);

        let stored = pipeline.store().get_paper(&paper.paper_id).await.unwrap().unwrap();
        assert_eq!(stored.open_count, 2);
    }

    #[tokio::test]
    async fn test_analyze_pdf_pages_corrects_paper_id() {
        let url = "https://example.org/papers/sparse.pdf";
        let expected_id = PaperId::for_url_hash(url);
        let generator = MockGenerationProvider::valid_for("arxiv:9999.99999");
        let pipeline = pipeline_with(generator);

        let stored = pipeline.analyze_pdf_pages(url, &sample_pages(), &AnalysisOptions::default()).await.unwrap();

        assert_eq!(stored.paper_id, expected_id);
        assert_eq!(stored.analysis.paper.id, expected_id.as_str());
        assert!(expected_id.as_str().starts_with("urlhash:"));

        let paper = pipeline.store().get_paper(&expected_id).await.unwrap().unwrap();
        assert_eq!(paper.title, PDF_PLACEHOLDER_TITLE);
        assert_eq!(paper.source, PaperSource::Pdf);
        assert_eq!(paper.pdf_url.as_deref(), Some(url));
        assert_eq!(paper.source_url, url);
        assert!(paper.analyzed);

        let saved = pipeline.store().get_analysis(&expected_id, &stored.analysis_version).await.unwrap();
        assert_eq!(saved.map(|s| s.analysis.paper.id), Some(expected_id.to_string()));
    }

    #[tokio::test]
    async fn test_analyze_pdf_pages_replaces_old_chunks() {
        let url = "/tmp/local.pdf";
        let pipeline = pipeline_with(MockGenerationProvider::valid_for("x"));
        pipeline.analyze_pdf_pages(url, &sample_pages(), &AnalysisOptions::default()).await.unwrap();

        let one_page = vec![PageText::new(1, "Only one short page of text.")];
        pipeline.analyze_pdf_pages(url, &one_page, &AnalysisOptions::default()).await.unwrap();

        let chunks = pipeline.store().get_chunks(&PaperId::for_url_hash(url)).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Only one short page"));
    }

    #[tokio::test]
    async fn test_analyze_paper_unknown_is_not_found() {
        let pipeline = pipeline_with(MockGenerationProvider::valid_for(ARXIV_ID));
        let id = PaperId::parse(ARXIV_ID).unwrap();
        let result = pipeline.analyze_paper(&id, &AnalysisOptions::default()).await;
        assert!(matches!(result, Err(AnalysisError::PaperNotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_analyze_paper_extracts_pdf() {
        let extractor = Arc::new(MockExtractor::succeeding(sample_pages(), Some("Sparse Attention")));
        let generator = MockGenerationProvider::valid_for(ARXIV_ID);
        let pipeline = pipeline_with(generator.clone()).with_extractor(extractor.clone());
        let paper = arxiv_paper();
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        let stored = pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap();
        assert_eq!(stored.paper_id, paper.paper_id);

        let calls = extractor.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["https://arxiv.org/pdf/2301.01234.pdf".to_string()]);

        let chunks = pipeline.store().get_chunks(&paper.paper_id).await.unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.page_start.is_some()));
        // Real title is kept; only the placeholder gets replaced
        let stored_paper = pipeline.store().get_paper(&paper.paper_id).await.unwrap().unwrap();
        assert_eq!(stored_paper.title, "A Paper");
        assert!(generator.get_prompts()[0].contains("A Paper"));
    }

    #[tokio::test]
    async fn test_extraction_failure_falls_back_to_abstract() {
        let extractor = Arc::new(MockExtractor::failing());
        let pipeline = pipeline_with(MockGenerationProvider::valid_for(ARXIV_ID)).with_extractor(extractor);
        let paper = arxiv_paper().with_abstract("We study sparse attention and find it helps on long inputs.");
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap();

        let chunks = pipeline.store().get_chunks(&paper.paper_id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.starts_with("We study sparse attention"));
        assert_eq!(chunks[0].page_start, None);
    }

    #[tokio::test]
    async fn test_extraction_failure_without_abstract() {
        let extractor = Arc::new(MockExtractor::failing());
        let pipeline = pipeline_with(MockGenerationProvider::valid_for(ARXIV_ID)).with_extractor(extractor);
        let paper = arxiv_paper();
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        let err = pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ExtractionFailed(_)));
        let message = err.to_string();
        assert!(message.starts_with("Failed to extract PDF:"));
        assert!(message.contains("connection refused"));
        assert!(message.ends_with("No abstract available as fallback"));
    }

    #[tokio::test]
    async fn test_no_extractor_and_no_abstract_is_no_content() {
        let pipeline = pipeline_with(MockGenerationProvider::valid_for(ARXIV_ID));
        let paper = arxiv_paper();
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        let err = pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoContent));
        assert_eq!(err.to_string(), "No content available to analyze");
    }

    #[tokio::test]
    async fn test_manual_paper_uses_abstract_without_extracting() {
        let extractor = Arc::new(MockExtractor::succeeding(sample_pages(), None));
        let pipeline = pipeline_with(MockGenerationProvider::valid_for("x")).with_extractor(extractor.clone());
        let mut paper = PaperMetadata::new(PaperId::for_url_hash("notes.txt"), "Notes", "notes.txt")
            .with_abstract("A short abstract about graph neural networks.");
        paper.source = PaperSource::Manual;
        paper.pdf_url = Some("https://example.org/notes.pdf".to_string());
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap();
        assert!(extractor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_persists_no_analysis() {
        let generator = MockGenerationProvider::returning("{\"summaryBullets\": []}".to_string());
        let pipeline = pipeline_with(generator);
        let paper = arxiv_paper().with_abstract("An abstract long enough to chunk into one piece.");
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        let err = pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Generation(GenerationError::SchemaValidation(_))));

        let saved = pipeline.store().get_analysis(&paper.paper_id, crate::models::ANALYSIS_VERSION).await.unwrap();
        assert!(saved.is_none());
        let stored_paper = pipeline.store().get_paper(&paper.paper_id).await.unwrap().unwrap();
        assert!(!stored_paper.analyzed);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_reported() {
        let pipeline = AnalysisPipeline::new(
            MockEmbeddingProvider::new().with_failure(true),
            MockGenerationProvider::valid_for(ARXIV_ID),
            MemoryStore::new(),
        );
        let paper = arxiv_paper().with_abstract("Abstract text.");
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        let err = pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Embedding(EmbeddingError::Api(_))));
    }

    #[tokio::test]
    async fn test_second_analysis_reuses_chunks_and_embeddings() {
        let pipeline = pipeline_with(MockGenerationProvider::valid_for(ARXIV_ID));
        let paper = arxiv_paper().with_abstract("We study sparse attention and find it helps on long inputs.");
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        let options = AnalysisOptions { tone: Tone::Critical, privacy_mode: PrivacyMode::Snippets };
        pipeline.analyze_paper(&paper.paper_id, &options).await.unwrap();
        pipeline.analyze_paper(&paper.paper_id, &options).await.unwrap();

        assert_eq!(pipeline.embedding_provider().get_embed_batch_calls().len(), 1);
        let embeddings = pipeline.store().get_embeddings(&paper.paper_id).await.unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[0].model, "mock-embed");
    }

    #[tokio::test]
    async fn test_model_change_forces_fresh_embeddings() {
        let mut pipeline = pipeline_with(MockGenerationProvider::valid_for(ARXIV_ID)).with_reembed_for_centroid(true);
        let paper = arxiv_paper().with_abstract("We study sparse attention and find it helps on long inputs.");
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap();
        assert_eq!(pipeline.embedding_provider().get_embed_batch_calls().len(), 2);

        pipeline.embedding_provider.model_name = "other-model".to_string();
        pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap();

        // One call for the chunk vectors and one for the centroid on each run.
        assert_eq!(pipeline.embedding_provider().get_embed_batch_calls().len(), 4);
        let embeddings = pipeline.store().get_embeddings(&paper.paper_id).await.unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[0].model, "other-model");
    }

    #[tokio::test]
    async fn test_reextract_forces_fresh_embeddings() {
        let pipeline = pipeline_with(MockGenerationProvider::valid_for(ARXIV_ID));
        let paper = arxiv_paper().with_abstract("We study sparse attention and find it helps on long inputs.");
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap();
        pipeline.reextract(&paper.paper_id).await.unwrap();
        assert!(pipeline.store().get_chunks(&paper.paper_id).await.unwrap().is_empty());
        assert!(pipeline.store().get_embeddings(&paper.paper_id).await.unwrap().is_empty());

        pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap();
        assert_eq!(pipeline.embedding_provider().get_embed_batch_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_reembed_for_centroid_calls_provider_again() {
        let pipeline = pipeline_with(MockGenerationProvider::valid_for(ARXIV_ID)).with_reembed_for_centroid(true);
        let paper = arxiv_paper().with_abstract("We study sparse attention and find it helps on long inputs.");
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap();

        let calls = pipeline.embedding_provider().get_embed_batch_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn test_observer_sees_stages_in_order() {
        let seen: Arc<Mutex<Vec<AnalysisStage>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let extractor = Arc::new(MockExtractor::succeeding(sample_pages(), None));
        let pipeline = pipeline_with(MockGenerationProvider::valid_for(ARXIV_ID))
            .with_extractor(extractor)
            .with_observer(move |stage, _| sink.lock().unwrap().push(stage));
        let paper = arxiv_paper();
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap();

        assert_eq!(
            seen.lock().unwrap().clone(),
            vec![
                AnalysisStage::Extraction,
                AnalysisStage::Embedding,
                AnalysisStage::Retrieval,
                AnalysisStage::Generation,
                AnalysisStage::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn test_placeholder_title_taken_from_document() {
        let url = "https://example.org/anon.pdf";
        let extractor = Arc::new(MockExtractor::succeeding(sample_pages(), Some("Sparse Attention at Scale")));
        let generator = MockGenerationProvider::valid_for("x");
        let pipeline = pipeline_with(generator.clone()).with_extractor(extractor);

        let mut paper = PaperMetadata::new(PaperId::for_url_hash(url), PDF_PLACEHOLDER_TITLE, url);
        paper.pdf_url = Some(url.to_string());
        pipeline.record_paper_seen(paper.clone()).await.unwrap();

        pipeline.analyze_paper(&paper.paper_id, &AnalysisOptions::default()).await.unwrap();
        let stored = pipeline.store().get_paper(&paper.paper_id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Sparse Attention at Scale");
        assert!(stored.analyzed);
        assert!(generator.get_prompts()[0].contains("Sparse Attention at Scale"));
    }
}
