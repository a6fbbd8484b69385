//! Database Migrations
//!
//! Schema migration definitions for the structured store.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema: page_sessions, trees, procedural_rules, episodic_corrections",
    up: MIGRATION_V1_UP,
}];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS page_sessions (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    page_loaded_at TEXT NOT NULL,
    tab_id TEXT NOT NULL,
    opener_tab_id TEXT,
    group_id TEXT NOT NULL,
    referrer_url TEXT,
    referrer_timestamp TEXT,
    title TEXT NOT NULL,
    tree_id TEXT NOT NULL,
    parent_page_id TEXT,
    classification TEXT NOT NULL,
    confidence REAL NOT NULL,
    reasoning TEXT NOT NULL,
    should_process INTEGER NOT NULL,
    processed_at TEXT NOT NULL,
    FOREIGN KEY (tree_id) REFERENCES trees(tree_id)
);

CREATE INDEX IF NOT EXISTS idx_page_sessions_tab ON page_sessions(tab_id);
CREATE INDEX IF NOT EXISTS idx_page_sessions_group ON page_sessions(group_id);
CREATE INDEX IF NOT EXISTS idx_page_sessions_tree ON page_sessions(tree_id);

CREATE TABLE IF NOT EXISTS trees (
    tree_id TEXT PRIMARY KEY,
    root_page_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS procedural_rules (
    id TEXT PRIMARY KEY,
    priority INTEGER NOT NULL,
    action TEXT NOT NULL,
    condition_ast TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_procedural_rules_priority ON procedural_rules(priority DESC);

CREATE TABLE IF NOT EXISTS episodic_corrections (
    id TEXT PRIMARY KEY,
    page_id TEXT NOT NULL,
    url TEXT NOT NULL,
    original_classification TEXT NOT NULL,
    corrected_classification TEXT NOT NULL,
    embedding BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_episodic_corrections_created ON episodic_corrections(created_at);

-- Append-only log of PageSession ids whose vector write succeeded but whose
-- structured write failed; replayed at startup before the HTTP listener opens.
CREATE TABLE IF NOT EXISTS unreconciled_ids (
    id TEXT PRIMARY KEY,
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}
