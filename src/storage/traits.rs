//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::storage::{News, Schedule};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Backends are shared between the scheduler, the persister and every
/// reporter of a running cover, so all methods take `&self` and
/// implementations provide their own synchronization.
pub trait Backend: Send + Sync {
    // ===== Schedules =====

    /// Gets a schedule by ID
    fn get_schedule(&self, id: i64) -> StorageResult<Option<Schedule>>;

    /// Lists schedules, optionally filtered by owner and/or root URL
    fn get_schedules(&self, owner: Option<&str>, url: Option<&str>)
        -> StorageResult<Vec<Schedule>>;

    /// Inserts or updates a schedule
    ///
    /// Assigns `schedule.id` on insert. Returns true if the schedule was
    /// created. The (owner, url) pair is unique.
    fn save_schedule(&self, schedule: &mut Schedule) -> StorageResult<bool>;

    /// Deletes a schedule and its news; returns false if it did not exist
    fn delete_schedule(&self, id: i64) -> StorageResult<bool>;

    // ===== News =====

    /// Gets the item stored for a schedule and URL
    fn get_news(&self, schedule_id: i64, url: &str) -> StorageResult<Option<News>>;

    /// Checks whether an item is stored for a schedule and URL
    fn news_exists(&self, schedule_id: i64, url: &str) -> StorageResult<bool> {
        Ok(self.get_news(schedule_id, url)?.is_some())
    }

    /// Lists all items stored for a schedule
    fn list_news(&self, schedule_id: i64) -> StorageResult<Vec<News>>;

    /// Saves items
    ///
    /// Idempotent per (schedule, url): re-saving an existing item updates its
    /// content, source and parsed fields instead of duplicating it.
    fn save_news(&self, items: &[News]) -> StorageResult<()>;

    /// Deletes items by (schedule, url)
    fn delete_news(&self, items: &[News]) -> StorageResult<()>;
}
