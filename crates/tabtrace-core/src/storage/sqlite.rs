//! SQLite Structured Store
//!
//! Persists `PageSession`s, `Tree`s, `ProceduralRule`s and
//! `EpisodicCorrection`s. Never holds page content — that lives in the
//! vector store only.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::model::{
    Classification, EpisodicCorrection, PageSession, ProceduralRule, RuleAction, RuleCondition,
    Tree,
};

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("initialization error: {0}")]
    Init(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// The structured store: page sessions, tree edges, rules, episodic
/// corrections and the unreconciled-id log.
///
/// Uses separate reader/writer connections for interior mutability, so
/// `Storage` is `Send + Sync` and callers can share it behind an `Arc`
/// without wrapping the whole thing in a mutex.
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Storage {
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA mmap_size = 268435456;
             PRAGMA journal_size_limit = 67108864;",
        )?;
        Ok(())
    }

    /// Open (creating if necessary) the structured store under `storage_path`.
    /// Pass `None` to use the platform default data directory.
    pub fn new(storage_path: Option<PathBuf>) -> Result<Self> {
        let dir = match storage_path {
            Some(p) => p,
            None => ProjectDirs::from("com", "tabtrace", "core")
                .ok_or_else(|| StorageError::Init("could not determine data directory".into()))?
                .data_dir()
                .to_path_buf(),
        };
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
        }

        let path = dir.join("tabtrace.db");
        Self::open(&path)
    }

    /// Open the store at an exact path (used by tests with a `tempfile` dir).
    pub fn open(path: &Path) -> Result<Self> {
        let writer_conn = Connection::open(path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("writer lock poisoned".into()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("reader lock poisoned".into()))
    }

    /// Insert a tree root edge. Idempotent: a duplicate `tree_id` is ignored.
    pub fn insert_tree(&self, tree: &Tree) -> Result<()> {
        self.writer()?.execute(
            "INSERT OR IGNORE INTO trees (tree_id, root_page_id) VALUES (?1, ?2)",
            params![tree.tree_id, tree.root_page_id],
        )?;
        Ok(())
    }

    /// Insert a page session. Idempotent on `id`: posting the same visit
    /// twice produces exactly one row.
    pub fn insert_page_session(&self, page: &PageSession) -> Result<()> {
        self.writer()?.execute(
            "INSERT OR IGNORE INTO page_sessions (
                id, url, page_loaded_at, tab_id, opener_tab_id, group_id,
                referrer_url, referrer_timestamp, title, tree_id, parent_page_id,
                classification, confidence, reasoning, should_process, processed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                page.id,
                page.url,
                page.page_loaded_at.to_rfc3339(),
                page.tab_id,
                page.opener_tab_id,
                page.group_id,
                page.referrer_url,
                page.referrer_timestamp.map(|t| t.to_rfc3339()),
                page.title,
                page.tree_id,
                page.parent_page_id,
                page.classification.as_str(),
                page.confidence,
                page.reasoning,
                page.should_process as i32,
                page.processed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Overwrite a reconnected orphan's `group_id` to match its new parent's,
    /// per the reconciler's group-reconciliation rule.
    pub fn update_group_id(&self, page_id: &str, group_id: &str) -> Result<()> {
        self.writer()?.execute(
            "UPDATE page_sessions SET group_id = ?1 WHERE id = ?2",
            params![group_id, page_id],
        )?;
        Ok(())
    }

    pub fn get_page_session(&self, id: &str) -> Result<Option<PageSession>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare("SELECT * FROM page_sessions WHERE id = ?1")?;
        Ok(stmt
            .query_row(params![id], Self::row_to_page_session)
            .optional()?)
    }

    /// Most recent prior `PageSession` in `tab_id`, by `page_loaded_at` then
    /// insertion order as the tie-break.
    pub fn most_recent_in_tab(&self, tab_id: &str) -> Result<Option<PageSession>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM page_sessions WHERE tab_id = ?1
             ORDER BY page_loaded_at DESC, rowid DESC LIMIT 1",
        )?;
        Ok(stmt
            .query_row(params![tab_id], Self::row_to_page_session)
            .optional()?)
    }

    /// Most recent prior `PageSession` in `group_id`, used to attach a visit
    /// opened without a direct tab parent to the rest of its tab group.
    pub fn most_recent_in_group(&self, group_id: &str) -> Result<Option<PageSession>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT * FROM page_sessions WHERE group_id = ?1
             ORDER BY page_loaded_at DESC, rowid DESC LIMIT 1",
        )?;
        Ok(stmt
            .query_row(params![group_id], Self::row_to_page_session)
            .optional()?)
    }

    /// Count of `PageSession`s already persisted in `group_id`, fed to the
    /// classifier's `RuleField::TabGroupSize` condition.
    pub fn count_in_group(&self, group_id: &str) -> Result<usize> {
        let reader = self.reader()?;
        let count: i64 = reader.query_row(
            "SELECT COUNT(*) FROM page_sessions WHERE group_id = ?1",
            params![group_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn row_to_page_session(row: &rusqlite::Row) -> rusqlite::Result<PageSession> {
        let classification: String = row.get("classification")?;
        let referrer_timestamp: Option<String> = row.get("referrer_timestamp")?;
        let page_loaded_at: String = row.get("page_loaded_at")?;
        let processed_at: String = row.get("processed_at")?;
        let should_process: i32 = row.get("should_process")?;

        Ok(PageSession {
            id: row.get("id")?,
            url: row.get("url")?,
            page_loaded_at: parse_timestamp(&page_loaded_at)?,
            tab_id: row.get("tab_id")?,
            opener_tab_id: row.get("opener_tab_id")?,
            group_id: row.get("group_id")?,
            referrer_url: row.get("referrer_url")?,
            referrer_timestamp: referrer_timestamp
                .map(|s| parse_timestamp(&s))
                .transpose()?,
            title: row.get("title")?,
            tree_id: row.get("tree_id")?,
            parent_page_id: row.get("parent_page_id")?,
            classification: Classification::parse(&classification).unwrap_or(Classification::Other),
            confidence: row.get("confidence")?,
            reasoning: row.get("reasoning")?,
            should_process: should_process != 0,
            processed_at: parse_timestamp(&processed_at)?,
        })
    }

    /// Rules in descending-priority evaluation order.
    pub fn list_procedural_rules(&self) -> Result<Vec<ProceduralRule>> {
        let reader = self.reader()?;
        let mut stmt = reader
            .prepare("SELECT id, priority, action, condition_ast FROM procedural_rules ORDER BY priority DESC")?;
        let rules = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let priority: i64 = row.get(1)?;
                let action_json: String = row.get(2)?;
                let condition_json: String = row.get(3)?;
                Ok((id, priority, action_json, condition_json))
            })?
            .filter_map(|r| r.ok())
            .map(|(id, priority, action_json, condition_json)| {
                let action: RuleAction = serde_json::from_str(&action_json)?;
                let condition: RuleCondition = serde_json::from_str(&condition_json)?;
                Ok(ProceduralRule {
                    id,
                    priority,
                    condition,
                    action,
                })
            })
            .collect::<std::result::Result<Vec<_>, serde_json::Error>>()?;
        Ok(rules)
    }

    pub fn insert_procedural_rule(&self, rule: &ProceduralRule) -> Result<()> {
        self.writer()?.execute(
            "INSERT OR REPLACE INTO procedural_rules (id, priority, action, condition_ast) VALUES (?1, ?2, ?3, ?4)",
            params![
                rule.id,
                rule.priority,
                serde_json::to_string(&rule.action)?,
                serde_json::to_string(&rule.condition)?,
            ],
        )?;
        Ok(())
    }

    pub fn insert_episodic_correction(&self, correction: &EpisodicCorrection) -> Result<()> {
        let embedding_bytes = encode_embedding(&correction.embedding);
        self.writer()?.execute(
            "INSERT OR REPLACE INTO episodic_corrections
                (id, page_id, url, original_classification, corrected_classification, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                correction.id,
                correction.page_id,
                correction.url,
                correction.original_classification.as_str(),
                correction.corrected_classification.as_str(),
                embedding_bytes,
                correction.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All episodic corrections, most recent first. The classifier's
    /// episodic stage ranks these by cosine similarity in memory; there's no
    /// need for the store to know about embeddings beyond storing and
    /// returning them.
    pub fn list_episodic_corrections(&self) -> Result<Vec<EpisodicCorrection>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, page_id, url, original_classification, corrected_classification, embedding, created_at
             FROM episodic_corrections ORDER BY created_at DESC",
        )?;
        let corrections = stmt
            .query_map([], |row| {
                let original: String = row.get(3)?;
                let corrected: String = row.get(4)?;
                let embedding_bytes: Vec<u8> = row.get(5)?;
                let created_at: String = row.get(6)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    original,
                    corrected,
                    embedding_bytes,
                    created_at,
                ))
            })?
            .filter_map(|r| r.ok())
            .filter_map(
                |(id, page_id, url, original, corrected, embedding_bytes, created_at)| {
                    Some(EpisodicCorrection {
                        id,
                        page_id,
                        url,
                        original_classification: Classification::parse(&original)?,
                        corrected_classification: Classification::parse(&corrected)?,
                        embedding: decode_embedding(&embedding_bytes),
                        created_at: parse_timestamp(&created_at).ok()?,
                    })
                },
            )
            .collect();
        Ok(corrections)
    }

    /// Record a page id whose vector write succeeded but whose structured
    /// write failed. Replayed at startup.
    pub fn record_unreconciled(&self, id: &str) -> Result<()> {
        self.writer()?.execute(
            "INSERT OR IGNORE INTO unreconciled_ids (id, recorded_at) VALUES (?1, ?2)",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove_unreconciled(&self, id: &str) -> Result<()> {
        self.writer()?
            .execute("DELETE FROM unreconciled_ids WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn list_unreconciled(&self) -> Result<Vec<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare("SELECT id FROM unreconciled_ids")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
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
