//! In-memory storage implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{chunk_ordinal, PaperFilter, PaperStore, StorageResult};
use crate::models::{Chunk, Embedding, PaperId, PaperLink, PaperMetadata, StoredAnalysis};

type ChunkKey = (u64, String);

#[derive(Debug, Default)]
struct Inner {
    papers: BTreeMap<PaperId, PaperMetadata>,
    chunks: BTreeMap<String, BTreeMap<ChunkKey, Chunk>>,
    embeddings: BTreeMap<String, BTreeMap<ChunkKey, Embedding>>,
    analyses: BTreeMap<(PaperId, String), StoredAnalysis>,
    links: Vec<PaperLink>,
}

/// Process-local store. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn chunk_key(chunk_id: &str) -> ChunkKey {
    (chunk_ordinal(chunk_id), chunk_id.to_string())
}

#[async_trait]
impl PaperStore for MemoryStore {
    async fn save_paper(&self, paper: &PaperMetadata) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.papers.insert(paper.paper_id.clone(), paper.clone());
        Ok(())
    }

    async fn get_paper(&self, paper_id: &PaperId) -> StorageResult<Option<PaperMetadata>> {
        Ok(self.inner.read().await.papers.get(paper_id).cloned())
    }

    async fn list_papers(&self, filter: &PaperFilter) -> StorageResult<Vec<PaperMetadata>> {
        let inner = self.inner.read().await;
        let mut papers: Vec<PaperMetadata> = inner.papers.values().filter(|p| filter.matches(p)).cloned().collect();
        papers.sort_by(|a, b| b.last_opened_at.cmp(&a.last_opened_at));
        Ok(papers)
    }

    async fn save_chunks(&self, chunks: &[Chunk]) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for chunk in chunks {
            inner
                .chunks
                .entry(chunk.paper_id.clone())
                .or_default()
                .insert(chunk_key(&chunk.chunk_id), chunk.clone());
        }
        Ok(())
    }

    async fn get_chunks(&self, paper_id: &PaperId) -> StorageResult<Vec<Chunk>> {
        let inner = self.inner.read().await;
        Ok(inner
            .chunks
            .get(paper_id.as_str())
            .map(|chunks| chunks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_chunks(&self, paper_id: &PaperId) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.chunks.remove(paper_id.as_str());
        inner.embeddings.remove(paper_id.as_str());
        Ok(())
    }

    async fn save_embeddings(&self, embeddings: &[Embedding]) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for embedding in embeddings {
            inner
                .embeddings
                .entry(embedding.paper_id.clone())
                .or_default()
                .insert(chunk_key(&embedding.chunk_id), embedding.clone());
        }
        Ok(())
    }

    async fn get_embeddings(&self, paper_id: &PaperId) -> StorageResult<Vec<Embedding>> {
        let inner = self.inner.read().await;
        Ok(inner
            .embeddings
            .get(paper_id.as_str())
            .map(|embeddings| embeddings.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_analysis(&self, analysis: &StoredAnalysis) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .analyses
            .insert((analysis.paper_id.clone(), analysis.analysis_version.clone()), analysis.clone());
        Ok(())
    }

    async fn get_analysis(&self, paper_id: &PaperId, version: &str) -> StorageResult<Option<StoredAnalysis>> {
        let inner = self.inner.read().await;
        Ok(inner.analyses.get(&(paper_id.clone(), version.to_string())).cloned())
    }

    async fn save_link(&self, link: &PaperLink) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.links.retain(|l| {
            !(l.from_paper_id == link.from_paper_id
                && l.to_paper_id == link.to_paper_id
                && l.relation_type == link.relation_type)
        });
        inner.links.push(link.clone());
        Ok(())
    }

    async fn get_links(&self, paper_id: &PaperId) -> StorageResult<Vec<PaperLink>> {
        let inner = self.inner.read().await;
        let mut links: Vec<PaperLink> = inner
            .links
            .iter()
            .filter(|l| &l.from_paper_id == paper_id || &l.to_paper_id == paper_id)
            .cloned()
            .collect();
        links.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(links)
    }

    async fn delete_paper(&self, paper_id: &PaperId) -> StorageResult<bool> {
        let mut inner = self.inner.write().await;
        let existed = inner.papers.remove(paper_id).is_some();
        inner.chunks.remove(paper_id.as_str());
        inner.embeddings.remove(paper_id.as_str());
        inner.analyses.retain(|(id, _), _| id != paper_id);
        inner.links.retain(|l| &l.from_paper_id != paper_id && &l.to_paper_id != paper_id);
        Ok(existed)
    }

    async fn clear_all(&self) -> StorageResult<()> {
        *self.inner.write().await = Inner::default();
        Ok(())
    }
}
