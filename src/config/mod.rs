//! Configuration module for newscover
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use newscover::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("newscover.toml")).unwrap();
//! println!("Scheduler ticks every {}ms", config.scheduler.tick_interval);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, CrawlerConfig, PubSubConfig, SchedulerConfig, StorageConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
