//! Vector store
//!
//! A single collection keyed by page id, combining a SQLite-backed content
//! blob (the sole source of truth for page content) with an in-memory HNSW
//! index for k-NN search. Supports `put(id, doc)`, `get(id)`, and
//! `knn(query_embedding, k)` per the persistence layout.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{SearchHit, VectorDocument, VectorMetadata};
use crate::vectorstore::index::{VectorIndex, VectorIndexConfig, VectorSearchError};

/// Vector store error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("index error: {0}")]
    Index(#[from] VectorSearchError),
    #[error("initialization error: {0}")]
    Init(String),
}

pub type Result<T> = std::result::Result<T, VectorStoreError>;

/// Key-addressed store of `VectorDocument`s with k-NN search.
pub struct VectorStore {
    conn: Mutex<Connection>,
    index: Mutex<VectorIndex>,
}

impl VectorStore {
    pub fn new(storage_path: Option<PathBuf>) -> Result<Self> {
        let dir = match storage_path {
            Some(p) => p,
            None => ProjectDirs::from("com", "tabtrace", "core")
                .ok_or_else(|| VectorStoreError::Init("could not determine data directory".into()))?
                .data_dir()
                .to_path_buf(),
        };
        std::fs::create_dir_all(&dir)?;
        Self::open(&dir.join("vectors.db"))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             CREATE TABLE IF NOT EXISTS vector_documents (
                 key TEXT PRIMARY KEY,
                 content TEXT NOT NULL,
                 embedding BLOB NOT NULL,
                 url TEXT NOT NULL,
                 title TEXT NOT NULL,
                 page_loaded_at TEXT NOT NULL
             );",
        )?;

        let index = VectorIndex::with_config(VectorIndexConfig::default())?;
        let store = Self {
            conn: Mutex::new(conn),
            index: Mutex::new(index),
        };
        store.load_index_from_disk()?;
        Ok(store)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| VectorStoreError::Init("connection lock poisoned".into()))
    }

    fn index(&self) -> Result<std::sync::MutexGuard<'_, VectorIndex>> {
        self.index
            .lock()
            .map_err(|_| VectorStoreError::Init("index lock poisoned".into()))
    }

    fn load_index_from_disk(&self) -> Result<()> {
        let rows: Vec<(String, Vec<u8>)> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare("SELECT key, embedding FROM vector_documents")?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect()
        };

        let mut index = self.index()?;
        for (key, embedding_bytes) in rows {
            let embedding = decode_embedding(&embedding_bytes);
            if let Err(e) = index.add(&key, &embedding) {
                tracing::warn!(key = %key, error = %e, "failed to load embedding into index");
            }
        }
        Ok(())
    }

    /// Write or atomically overwrite the document under `doc.key`.
    pub fn put(&self, doc: &VectorDocument) -> Result<()> {
        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT OR REPLACE INTO vector_documents (key, content, embedding, url, title, page_loaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    doc.key,
                    doc.content,
                    encode_embedding(&doc.embedding),
                    doc.metadata.url,
                    doc.metadata.title,
                    doc.metadata.page_loaded_at.to_rfc3339(),
                ],
            )?;
        }
        self.index()?.add(&doc.key, &doc.embedding)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<VectorDocument>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, content, embedding, url, title, page_loaded_at FROM vector_documents WHERE key = ?1",
        )?;
        let doc = stmt
            .query_row(params![key], Self::row_to_document)
            .optional()?;
        Ok(doc)
    }

    fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<VectorDocument> {
        let embedding_bytes: Vec<u8> = row.get(2)?;
        let page_loaded_at: String = row.get(5)?;
        Ok(VectorDocument {
            key: row.get(0)?,
            content: row.get(1)?,
            embedding: decode_embedding(&embedding_bytes),
            metadata: VectorMetadata {
                url: row.get(3)?,
                title: row.get(4)?,
                page_loaded_at: parse_timestamp(&page_loaded_at)?,
            },
        })
    }

    /// `semantic_search`: k nearest documents by cosine similarity, with a
    /// 200-character content preview.
    pub fn knn(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let hits = self.index()?.search(query_embedding, limit)?;
        let mut results = Vec::with_capacity(hits.len());
        for (key, score) in hits {
            if let Some(doc) = self.get(&key)? {
                let preview: String = doc.content.chars().take(200).collect();
                results.push(SearchHit {
                    id: doc.key,
                    url: doc.metadata.url,
                    title: doc.metadata.title,
                    score,
                    preview,
                });
            }
        }
        Ok(results)
    }
}

fn parse_timestamp(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid timestamp '{value}': {e}"),
                )),
            )
        })
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectorstore::index::DEFAULT_DIMENSIONS;

    fn sample_vector(seed: f32) -> Vec<f32> {
        (0..DEFAULT_DIMENSIONS)
            .map(|i| ((i as f32 + seed) / DEFAULT_DIMENSIONS as f32).sin())
            .collect()
    }

    fn store() -> VectorStore {
        let dir = tempfile::tempdir().unwrap();
        VectorStore::open(&dir.path().join("vectors.db")).unwrap()
    }

    #[test]
    fn put_and_get_roundtrip() {
        let store = store();
        let doc = VectorDocument {
            key: "page-1".to_string(),
            content: "hello world".to_string(),
            embedding: sample_vector(1.0),
            metadata: VectorMetadata {
                url: "https://example.com".to_string(),
                title: "Example".to_string(),
                page_loaded_at: Utc::now(),
            },
        };
        store.put(&doc).unwrap();

        let fetched = store.get("page-1").unwrap().unwrap();
        assert_eq!(fetched.content, "hello world");
    }

    #[test]
    fn knn_returns_preview() {
        let store = store();
        let doc = VectorDocument {
            key: "page-1".to_string(),
            content: "a".repeat(500),
            embedding: sample_vector(1.0),
            metadata: VectorMetadata {
                url: "https://example.com".to_string(),
                title: "Example".to_string(),
                page_loaded_at: Utc::now(),
            },
        };
        store.put(&doc).unwrap();

        let hits = store.knn(&sample_vector(1.0), 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].preview.len(), 200);
    }
}
