//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the newscover database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Registered root URLs
CREATE TABLE IF NOT EXISTS schedules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    url TEXT NOT NULL,
    cycle_secs INTEGER NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    kind TEXT NOT NULL,
    options TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(owner, url)
);

CREATE INDEX IF NOT EXISTS idx_schedules_owner ON schedules(owner);

-- Items kept by covers
CREATE TABLE IF NOT EXISTS news (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    schedule_id INTEGER NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    source TEXT,
    distance INTEGER NOT NULL,
    depth INTEGER NOT NULL,
    content TEXT NOT NULL,
    title TEXT,
    author TEXT,
    summary TEXT,
    text TEXT,
    image TEXT,
    published_at TEXT,
    fetched_at TEXT NOT NULL,
    UNIQUE(schedule_id, url)
);

CREATE INDEX IF NOT EXISTS idx_news_schedule ON news(schedule_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
