//! Storage module for schedules and news items
//!
//! This module defines the [`Backend`] contract consumed by covers and the
//! scheduler, together with two implementations:
//! - [`SqliteBackend`]: on-disk SQLite database
//! - [`MemoryBackend`]: process-local maps, used for tests and dry runs

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::{Backend, StorageError, StorageResult};

use crate::crawler::ReporterKind;
use crate::filter::FilterOptions;
use crate::url::normalize;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A registered root URL plus its crawl cycle and filter options
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    /// Zero until the schedule is first saved
    pub id: i64,
    pub owner: String,
    pub url: String,
    pub cycle: Duration,
    pub enabled: bool,
    pub kind: ReporterKind,
    pub options: FilterOptions,
}

impl Schedule {
    /// Creates an unsaved, enabled page schedule; `url` is normalized
    pub fn new(owner: &str, url: &str, cycle: Duration) -> Self {
        Self {
            id: 0,
            owner: owner.to_string(),
            url: normalize(url),
            cycle,
            enabled: true,
            kind: ReporterKind::Page,
            options: FilterOptions::default(),
        }
    }

    pub fn with_kind(mut self, kind: ReporterKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_options(mut self, options: FilterOptions) -> Self {
        self.options = options;
        self
    }
}

/// One fetched page or feed entry kept by a cover
#[derive(Debug, Clone, PartialEq)]
pub struct News {
    pub id: Option<i64>,
    pub schedule_id: i64,
    pub url: String,

    /// URL of the item whose page linked here; `None` for the root item
    pub source: Option<String>,

    /// Hops from the schedule's root item
    pub distance: u32,

    /// Path depth below the schedule root (or the matching brother root)
    pub depth: usize,

    /// Raw fetched body
    pub content: String,

    pub title: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub text: Option<String>,
    pub image: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

impl News {
    /// Creates an empty, unsaved item; `url` is normalized
    pub fn new(schedule_id: i64, url: &str) -> Self {
        Self {
            id: None,
            schedule_id,
            url: normalize(url),
            source: None,
            distance: 0,
            depth: 0,
            content: String::new(),
            title: None,
            author: None,
            summary: None,
            text: None,
            image: None,
            published_at: None,
            fetched_at: Utc::now(),
        }
    }
}
