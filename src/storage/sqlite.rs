//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Backend trait.

use crate::crawler::ReporterKind;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Backend, StorageError, StorageResult};
use crate::storage::{News, Schedule};
use crate::CoverError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEDULE_COLUMNS: &str = "id, owner, url, cycle_secs, enabled, kind, options";

const NEWS_COLUMNS: &str = "id, schedule_id, url, source, distance, depth, content, title, author,
     summary, text, image, published_at, fetched_at";

/// SQLite storage backend
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens or creates the database at `path`
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteBackend)` - Successfully opened/created database
    /// * `Err(CoverError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, CoverError> {
        let conn = Connection::open(path).map_err(StorageError::from)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )
        .map_err(StorageError::from)?;

        initialize_schema(&conn).map_err(StorageError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }
}

/// Raw schedule columns, converted outside the row closure
struct ScheduleRow {
    id: i64,
    owner: String,
    url: String,
    cycle_secs: i64,
    enabled: bool,
    kind: String,
    options: String,
}

impl ScheduleRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            url: row.get(2)?,
            cycle_secs: row.get(3)?,
            enabled: row.get(4)?,
            kind: row.get(5)?,
            options: row.get(6)?,
        })
    }
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = StorageError;

    fn try_from(row: ScheduleRow) -> StorageResult<Self> {
        let kind = ReporterKind::from_db_string(&row.kind).ok_or_else(|| {
            StorageError::Serialization(format!(
                "unknown reporter kind '{}' for schedule {}",
                row.kind, row.id
            ))
        })?;
        let options = serde_json::from_str(&row.options).map_err(|e| {
            StorageError::Serialization(format!("bad options for schedule {}: {}", row.id, e))
        })?;

        Ok(Schedule {
            id: row.id,
            owner: row.owner,
            url: row.url,
            cycle: Duration::from_secs(row.cycle_secs.max(0) as u64),
            enabled: row.enabled,
            kind,
            options,
        })
    }
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn news_from_row(row: &Row<'_>) -> rusqlite::Result<News> {
    let published_at = match row.get::<_, Option<String>>(12)? {
        Some(raw) => Some(parse_time(12, &raw)?),
        None => None,
    };
    let fetched_at = parse_time(13, &row.get::<_, String>(13)?)?;

    Ok(News {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        url: row.get(2)?,
        source: row.get(3)?,
        distance: row.get(4)?,
        depth: row.get::<_, i64>(5)?.max(0) as usize,
        content: row.get(6)?,
        title: row.get(7)?,
        author: row.get(8)?,
        summary: row.get(9)?,
        text: row.get(10)?,
        image: row.get(11)?,
        published_at,
        fetched_at,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

impl Backend for SqliteBackend {
    // ===== Schedules =====

    fn get_schedule(&self, id: i64) -> StorageResult<Option<Schedule>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM schedules WHERE id = ?1", SCHEDULE_COLUMNS),
                params![id],
                ScheduleRow::from_row,
            )
            .optional()?;

        row.map(Schedule::try_from).transpose()
    }

    fn get_schedules(
        &self,
        owner: Option<&str>,
        url: Option<&str>,
    ) -> StorageResult<Vec<Schedule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM schedules
             WHERE (?1 IS NULL OR owner = ?1) AND (?2 IS NULL OR url = ?2)
             ORDER BY id",
            SCHEDULE_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![owner, url], ScheduleRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(Schedule::try_from).collect()
    }

    fn save_schedule(&self, schedule: &mut Schedule) -> StorageResult<bool> {
        let options = serde_json::to_string(&schedule.options)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let conn = self.conn()?;

        if schedule.id == 0 {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO schedules (owner, url, cycle_secs, enabled, kind, options, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    schedule.owner,
                    schedule.url,
                    schedule.cycle.as_secs() as i64,
                    schedule.enabled,
                    schedule.kind.to_db_string(),
                    options,
                    now
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StorageError::ConstraintViolation(format!(
                        "schedule ({}, {}) already exists",
                        schedule.owner, schedule.url
                    ))
                } else {
                    e.into()
                }
            })?;
            schedule.id = conn.last_insert_rowid();
            return Ok(true);
        }

        let changed = conn.execute(
            "UPDATE schedules SET owner = ?1, url = ?2, cycle_secs = ?3, enabled = ?4,
             kind = ?5, options = ?6 WHERE id = ?7",
            params![
                schedule.owner,
                schedule.url,
                schedule.cycle.as_secs() as i64,
                schedule.enabled,
                schedule.kind.to_db_string(),
                options,
                schedule.id
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::ScheduleNotFound(schedule.id));
        }
        Ok(false)
    }

    fn delete_schedule(&self, id: i64) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM news WHERE schedule_id = ?1", params![id])?;
        let changed = tx.execute("DELETE FROM schedules WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(changed > 0)
    }

    // ===== News =====

    fn get_news(&self, schedule_id: i64, url: &str) -> StorageResult<Option<News>> {
        let conn = self.conn()?;
        let news = conn
            .query_row(
                &format!(
                    "SELECT {} FROM news WHERE schedule_id = ?1 AND url = ?2",
                    NEWS_COLUMNS
                ),
                params![schedule_id, url],
                news_from_row,
            )
            .optional()?;
        Ok(news)
    }

    fn news_exists(&self, schedule_id: i64, url: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM news WHERE schedule_id = ?1 AND url = ?2",
            params![schedule_id, url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn list_news(&self, schedule_id: i64) -> StorageResult<Vec<News>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM news WHERE schedule_id = ?1 ORDER BY id",
            NEWS_COLUMNS
        ))?;

        let news = stmt
            .query_map(params![schedule_id], news_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(news)
    }

    fn save_news(&self, items: &[News]) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO news (schedule_id, url, source, distance, depth, content, title,
                 author, summary, text, image, published_at, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(schedule_id, url) DO UPDATE SET
                    source = excluded.source,
                    content = excluded.content,
                    title = excluded.title,
                    author = excluded.author,
                    summary = excluded.summary,
                    text = excluded.text,
                    image = excluded.image,
                    published_at = excluded.published_at,
                    fetched_at = excluded.fetched_at",
            )?;

            for item in items {
                stmt.execute(params![
                    item.schedule_id,
                    item.url,
                    item.source,
                    item.distance,
                    item.depth as i64,
                    item.content,
                    item.title,
                    item.author,
                    item.summary,
                    item.text,
                    item.image,
                    item.published_at.map(|t| t.to_rfc3339()),
                    item.fetched_at.to_rfc3339(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_news(&self, items: &[News]) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for item in items {
            tx.execute(
                "DELETE FROM news WHERE schedule_id = ?1 AND url = ?2",
                params![item.schedule_id, item.url],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
