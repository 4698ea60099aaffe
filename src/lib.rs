//! Newscover: periodic recursive crawler for registered root URLs
//!
//! This crate keeps the descendant content of registered "schedules" fresh.
//! A scheduler fires one cover (crawl run) per schedule cycle, the cover fans
//! out a tree of reporters that fetch, filter and persist pages, and a
//! persister keeps the scheduler's job table in sync with the schedule store
//! over pub/sub.

pub mod config;
pub mod crawler;
pub mod filter;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for newscover operations
#[derive(Debug, Error)]
pub enum CoverError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Pub/sub error: {0}")]
    PubSub(#[from] crawler::PubSubError),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::NodeState,
        to: state::NodeState,
    },

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(i64),

    #[error("Cover for schedule {schedule_id} exceeded its {seconds}s deadline")]
    Deadline { schedule_id: i64, seconds: u64 },

    #[error("Job for schedule {0} was dropped before completion")]
    JobDropped(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL: {0}")]
    MissingHost(String),
}

/// Result type alias for newscover operations
pub type Result<T> = std::result::Result<T, CoverError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Cover, Persister, ReporterKind, Scheduler};
pub use filter::{worth_to_visit, FilterOptions};
pub use state::NodeState;
pub use storage::{Backend, News, Schedule};
