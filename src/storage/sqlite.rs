//! SQLite storage implementation.
//!
//! This module provides a SQLite-based implementation of the `PaperStore` trait.
//! It uses rusqlite for database access and stores embeddings as BLOBs.
//!
//! A single connection sits behind a mutex; every call runs on the blocking
//! thread pool so async callers are never stalled by disk I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{chunk_ordinal, PaperFilter, PaperStore, StorageError, StorageResult};
use crate::models::{Chunk, Embedding, PaperId, PaperLink, PaperMetadata, StoredAnalysis};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS papers (
    paper_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    authors_json TEXT NOT NULL,
    abstract TEXT,
    venue TEXT,
    year INTEGER,
    source TEXT NOT NULL,
    pdf_url TEXT,
    source_url TEXT NOT NULL,
    first_seen_at INTEGER NOT NULL,
    last_opened_at INTEGER NOT NULL,
    open_count INTEGER NOT NULL DEFAULT 0,
    saved INTEGER NOT NULL DEFAULT 0,
    analyzed INTEGER NOT NULL DEFAULT 0,
    starred INTEGER NOT NULL DEFAULT 0,
    tags_json TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_papers_last_opened ON papers(last_opened_at);

CREATE TABLE IF NOT EXISTS chunks (
    paper_id TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    text TEXT NOT NULL,
    section TEXT,
    page_start INTEGER,
    page_end INTEGER,
    token_count INTEGER,
    PRIMARY KEY (paper_id, chunk_id)
);

CREATE INDEX IF NOT EXISTS idx_chunks_order ON chunks(paper_id, ordinal);

CREATE TABLE IF NOT EXISTS embeddings (
    paper_id TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    vector BLOB NOT NULL,
    model TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (paper_id, chunk_id)
);

CREATE TABLE IF NOT EXISTS analyses (
    paper_id TEXT NOT NULL,
    analysis_version TEXT NOT NULL,
    analysis_json TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (paper_id, analysis_version)
);

CREATE TABLE IF NOT EXISTS links (
    from_paper_id TEXT NOT NULL,
    to_paper_id TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    rationale TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (from_paper_id, to_paper_id, relation_type)
);
"#;

const PAPER_COLUMNS: &str = "paper_id, title, authors_json, abstract, venue, year, source, pdf_url, source_url, \
     first_seen_at, last_opened_at, open_count, saved, analyzed, starred, tags_json";

/// SQLite-based paper store.
///
/// # Schema
/// - `papers`: library metadata, author and tag lists as JSON text
/// - `chunks`, `embeddings`: keyed by `(paper_id, chunk_id)`, vectors as
///   little-endian f32 BLOBs
/// - `analyses`: analysis JSON keyed by `(paper_id, analysis_version)`
/// - `links`: keyed by `(from_paper_id, to_paper_id, relation_type)`
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

fn query_err(e: rusqlite::Error) -> StorageError {
    StorageError::QueryError(e.to_string())
}

fn serde_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::SerializationError(e.to_string())
}

fn sql_ordinal(chunk_id: &str) -> i64 {
    i64::try_from(chunk_ordinal(chunk_id)).unwrap_or(i64::MAX)
}

impl SqliteStore {
    /// Open (or create) the database file at `path` and ensure the schema.
    ///
    /// # Errors
    /// - `StorageError::ConnectionError` if the file cannot be opened
    /// - `StorageError::SchemaError` if schema creation fails
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::ConnectionError(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path).map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        debug!("SQLite journal mode: {}", mode);
        debug!("Opened SQLite store at {}", path.display());
        Self::with_schema(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns `StorageError` if the connection or schema cannot be created
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        Self::with_schema(conn)
    }

    fn with_schema(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA).map_err(|e| StorageError::SchemaError(e.to_string()))?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| StorageError::SchemaError(e.to_string()))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::ConnectionError("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Other(format!("storage task failed: {}", e)))?
    }

    /// Serialize an embedding vector to little-endian bytes.
    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Deserialize an embedding vector from BLOB bytes.
    ///
    /// # Errors
    /// Returns `StorageError::SerializationError` if the length is not a
    /// multiple of four
    fn deserialize_embedding(bytes: &[u8]) -> StorageResult<Vec<f32>> {
        if bytes.len() % 4 != 0 {
            return Err(StorageError::SerializationError(format!(
                "embedding blob length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

struct PaperRow {
    paper_id: String,
    title: String,
    authors_json: String,
    abstract_text: Option<String>,
    venue: Option<String>,
    year: Option<i32>,
    source: String,
    pdf_url: Option<String>,
    source_url: String,
    first_seen_at: i64,
    last_opened_at: i64,
    open_count: u32,
    saved: bool,
    analyzed: bool,
    starred: bool,
    tags_json: String,
}

impl PaperRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            paper_id: row.get(0)?,
            title: row.get(1)?,
            authors_json: row.get(2)?,
            abstract_text: row.get(3)?,
            venue: row.get(4)?,
            year: row.get(5)?,
            source: row.get(6)?,
            pdf_url: row.get(7)?,
            source_url: row.get(8)?,
            first_seen_at: row.get(9)?,
            last_opened_at: row.get(10)?,
            open_count: row.get(11)?,
            saved: row.get(12)?,
            analyzed: row.get(13)?,
            starred: row.get(14)?,
            tags_json: row.get(15)?,
        })
    }

    fn into_metadata(self) -> StorageResult<PaperMetadata> {
        Ok(PaperMetadata {
            paper_id: PaperId::parse(&self.paper_id).map_err(serde_err)?,
            title: self.title,
            authors: serde_json::from_str(&self.authors_json).map_err(serde_err)?,
            abstract_text: self.abstract_text,
            venue: self.venue,
            year: self.year,
            source: self.source.parse().map_err(serde_err)?,
            pdf_url: self.pdf_url,
            source_url: self.source_url,
            first_seen_at: self.first_seen_at,
            last_opened_at: self.last_opened_at,
            open_count: self.open_count,
            saved: self.saved,
            analyzed: self.analyzed,
            starred: self.starred,
            tags: serde_json::from_str(&self.tags_json).map_err(serde_err)?,
        })
    }
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let token_count: Option<i64> = row.get(6)?;
    Ok(Chunk {
        paper_id: row.get(0)?,
        chunk_id: row.get(1)?,
        text: row.get(2)?,
        section: row.get(3)?,
        page_start: row.get(4)?,
        page_end: row.get(5)?,
        token_count: token_count.and_then(|n| usize::try_from(n).ok()),
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

#[async_trait]
impl PaperStore for SqliteStore {
    async fn save_paper(&self, paper: &PaperMetadata) -> StorageResult<()> {
        let paper = paper.clone();
        let authors_json = serde_json::to_string(&paper.authors).map_err(serde_err)?;
        let tags_json = serde_json::to_string(&paper.tags).map_err(serde_err)?;
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO papers ({}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    PAPER_COLUMNS
                ),
                params![
                    paper.paper_id.as_str(),
                    paper.title,
                    authors_json,
                    paper.abstract_text,
                    paper.venue,
                    paper.year,
                    paper.source.as_str(),
                    paper.pdf_url,
                    paper.source_url,
                    paper.first_seen_at,
                    paper.last_opened_at,
                    paper.open_count,
                    paper.saved,
                    paper.analyzed,
                    paper.starred,
                    tags_json,
                ],
            )
            .map_err(query_err)?;
            Ok(())
        })
        .await
    }

    async fn get_paper(&self, paper_id: &PaperId) -> StorageResult<Option<PaperMetadata>> {
        let paper_id = paper_id.to_string();
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM papers WHERE paper_id = ?1", PAPER_COLUMNS),
                    [paper_id],
                    PaperRow::from_row,
                )
                .optional()
                .map_err(query_err)
            })
            .await?;
        row.map(PaperRow::into_metadata).transpose()
    }

    async fn list_papers(&self, filter: &PaperFilter) -> StorageResult<Vec<PaperMetadata>> {
        let rows = self
            .with_conn(|conn| {
                let mut stmt = conn
                    .prepare(&format!("SELECT {} FROM papers ORDER BY last_opened_at DESC", PAPER_COLUMNS))
                    .map_err(query_err)?;
                let rows = stmt
                    .query_map([], PaperRow::from_row)
                    .map_err(query_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(query_err)?;
                Ok(rows)
            })
            .await?;

        let mut papers = Vec::with_capacity(rows.len());
        for row in rows {
            let paper = row.into_metadata()?;
            if filter.matches(&paper) {
                papers.push(paper);
            }
        }
        Ok(papers)
    }

    async fn save_chunks(&self, chunks: &[Chunk]) -> StorageResult<()> {
        let chunks = chunks.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(query_err)?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT OR REPLACE INTO chunks \
                         (paper_id, chunk_id, ordinal, text, section, page_start, page_end, token_count) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    )
                    .map_err(query_err)?;
                for chunk in &chunks {
                    stmt.execute(params![
                        chunk.paper_id,
                        chunk.chunk_id,
                        sql_ordinal(&chunk.chunk_id),
                        chunk.text,
                        chunk.section,
                        chunk.page_start,
                        chunk.page_end,
                        chunk.token_count.map(|n| n as i64),
                    ])
                    .map_err(query_err)?;
                }
            }
            tx.commit().map_err(query_err)
        })
        .await
    }

    async fn get_chunks(&self, paper_id: &PaperId) -> StorageResult<Vec<Chunk>> {
        let paper_id = paper_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT paper_id, chunk_id, text, section, page_start, page_end, token_count \
                     FROM chunks WHERE paper_id = ?1 ORDER BY ordinal, chunk_id",
                )
                .map_err(query_err)?;
            let chunks = stmt
                .query_map([paper_id], chunk_from_row)
                .map_err(query_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(query_err)?;
            Ok(chunks)
        })
        .await
    }

    async fn delete_chunks(&self, paper_id: &PaperId) -> StorageResult<()> {
        let paper_id = paper_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(query_err)?;
            tx.execute("DELETE FROM chunks WHERE paper_id = ?1", [&paper_id]).map_err(query_err)?;
            tx.execute("DELETE FROM embeddings WHERE paper_id = ?1", [&paper_id]).map_err(query_err)?;
            tx.commit().map_err(query_err)
        })
        .await
    }

    async fn save_embeddings(&self, embeddings: &[Embedding]) -> StorageResult<()> {
        let embeddings = embeddings.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(query_err)?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT OR REPLACE INTO embeddings \
                         (paper_id, chunk_id, ordinal, vector, model, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )
                    .map_err(query_err)?;
                for embedding in &embeddings {
                    stmt.execute(params![
                        embedding.paper_id,
                        embedding.chunk_id,
                        sql_ordinal(&embedding.chunk_id),
                        SqliteStore::serialize_embedding(&embedding.vector),
                        embedding.model,
                        embedding.created_at,
                    ])
                    .map_err(query_err)?;
                }
            }
            tx.commit().map_err(query_err)
        })
        .await
    }

    async fn get_embeddings(&self, paper_id: &PaperId) -> StorageResult<Vec<Embedding>> {
        let paper_id = paper_id.to_string();
        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT paper_id, chunk_id, vector, model, created_at \
                         FROM embeddings WHERE paper_id = ?1 ORDER BY ordinal, chunk_id",
                    )
                    .map_err(query_err)?;
                let rows = stmt
                    .query_map([paper_id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    })
                    .map_err(query_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(query_err)?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(paper_id, chunk_id, blob, model, created_at)| {
                Ok(Embedding { paper_id, chunk_id, vector: Self::deserialize_embedding(&blob)?, model, created_at })
            })
            .collect()
    }

    async fn save_analysis(&self, analysis: &StoredAnalysis) -> StorageResult<()> {
        let analysis_json = serde_json::to_string(&analysis.analysis).map_err(serde_err)?;
        let paper_id = analysis.paper_id.to_string();
        let version = analysis.analysis_version.clone();
        let created_at = analysis.created_at;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO analyses (paper_id, analysis_version, analysis_json, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![paper_id, version, analysis_json, created_at],
            )
            .map_err(query_err)?;
            Ok(())
        })
        .await
    }

    async fn get_analysis(&self, paper_id: &PaperId, version: &str) -> StorageResult<Option<StoredAnalysis>> {
        let key = (paper_id.to_string(), version.to_string());
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT analysis_json, created_at FROM analyses WHERE paper_id = ?1 AND analysis_version = ?2",
                    params![key.0, key.1],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()
                .map_err(query_err)
            })
            .await?;

        match row {
            Some((json, created_at)) => Ok(Some(StoredAnalysis {
                paper_id: paper_id.clone(),
                analysis_version: version.to_string(),
                analysis: serde_json::from_str(&json).map_err(serde_err)?,
                created_at,
            })),
            None => Ok(None),
        }
    }

    async fn save_link(&self, link: &PaperLink) -> StorageResult<()> {
        let link = link.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO links (from_paper_id, to_paper_id, relation_type, rationale, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    link.from_paper_id.as_str(),
                    link.to_paper_id.as_str(),
                    link.relation_type.as_str(),
                    link.rationale,
                    link.created_at,
                ],
            )
            .map_err(query_err)?;
            Ok(())
        })
        .await
    }

    async fn get_links(&self, paper_id: &PaperId) -> StorageResult<Vec<PaperLink>> {
        let paper_id = paper_id.to_string();
        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT from_paper_id, to_paper_id, relation_type, rationale, created_at FROM links \
                         WHERE from_paper_id = ?1 OR to_paper_id = ?1 ORDER BY created_at DESC",
                    )
                    .map_err(query_err)?;
                let rows = stmt
                    .query_map([paper_id], link_from_row)
                    .map_err(query_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(query_err)?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(from, to, relation, rationale, created_at)| {
                Ok(PaperLink {
                    from_paper_id: PaperId::parse(&from).map_err(serde_err)?,
                    to_paper_id: PaperId::parse(&to).map_err(serde_err)?,
                    relation_type: relation.parse().map_err(serde_err)?,
                    rationale,
                    created_at,
                })
            })
            .collect()
    }

    async fn delete_paper(&self, paper_id: &PaperId) -> StorageResult<bool> {
        let paper_id = paper_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(query_err)?;
            let removed = tx.execute("DELETE FROM papers WHERE paper_id = ?1", [&paper_id]).map_err(query_err)?;
            for sql in [
                "DELETE FROM chunks WHERE paper_id = ?1",
                "DELETE FROM embeddings WHERE paper_id = ?1",
                "DELETE FROM analyses WHERE paper_id = ?1",
                "DELETE FROM links WHERE from_paper_id = ?1 OR to_paper_id = ?1",
            ] {
                tx.execute(sql, [&paper_id]).map_err(query_err)?;
            }
            tx.commit().map_err(query_err)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn clear_all(&self) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "BEGIN;
                 DELETE FROM links;
                 DELETE FROM analyses;
                 DELETE FROM embeddings;
                 DELETE FROM chunks;
                 DELETE FROM papers;
                 COMMIT;",
            )
            .map_err(query_err)
        })
        .await
    }
}
