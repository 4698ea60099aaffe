use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for newscover
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
}

/// Crawl behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// User agent sent with every fetch
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Maximum number of in-flight fetches per cover, 0 for unbounded
    #[serde(rename = "max-concurrent-fetches", default)]
    pub max_concurrent_fetches: usize,

    /// Deadline for one cover run (seconds), 0 for none
    #[serde(rename = "run-deadline", default)]
    pub run_deadline: u64,

    /// Persist a cover's items in one batch at the end of the run
    #[serde(rename = "bulk-report", default = "default_true")]
    pub bulk_report: bool,
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        (self.run_deadline > 0).then(|| Duration::from_secs(self.run_deadline))
    }

    pub fn fetch_limit(&self) -> Option<usize> {
        (self.max_concurrent_fetches > 0).then_some(self.max_concurrent_fetches)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            max_concurrent_fetches: 0,
            run_deadline: 0,
            bulk_report: true,
        }
    }
}

/// Timer loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between timer loop ticks (milliseconds)
    #[serde(rename = "tick-interval", default = "default_tick_interval")]
    pub tick_interval: u64,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Pub/sub transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    /// Redis server; the in-process transport is used when absent
    #[serde(rename = "redis-url", default)]
    pub redis_url: Option<String>,

    /// Prefix of the three schedule channels
    #[serde(rename = "channel-prefix", default = "default_channel_prefix")]
    pub channel_prefix: String,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            channel_prefix: default_channel_prefix(),
        }
    }
}

fn default_user_agent() -> String {
    format!("newscover/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_database_path() -> String {
    "./newscover.db".to_string()
}

fn default_channel_prefix() -> String {
    "newscover".to_string()
}
