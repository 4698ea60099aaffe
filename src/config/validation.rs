use crate::config::types::{Config, CrawlerConfig, PubSubConfig, SchedulerConfig, StorageConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_scheduler_config(&config.scheduler)?;
    validate_storage_config(&config.storage)?;
    validate_pubsub_config(&config.pubsub)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.request_timeout < 1 {
        return Err(ConfigError::Validation(format!(
            "request_timeout must be >= 1s, got {}s",
            config.request_timeout
        )));
    }

    Ok(())
}

/// Validates timer loop configuration
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.tick_interval < 10 {
        return Err(ConfigError::Validation(format!(
            "tick_interval must be >= 10ms, got {}ms",
            config.tick_interval
        )));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates pub/sub configuration
fn validate_pubsub_config(config: &PubSubConfig) -> Result<(), ConfigError> {
    if let Some(redis_url) = &config.redis_url {
        let url = Url::parse(redis_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid redis_url: {}", e)))?;

        if url.scheme() != "redis" && url.scheme() != "rediss" {
            return Err(ConfigError::InvalidUrl(format!(
                "redis_url must use redis:// or rediss://, got '{}'",
                redis_url
            )));
        }
    }

    if config.channel_prefix.is_empty() || config.channel_prefix.contains(char::is_whitespace) {
        return Err(ConfigError::Validation(format!(
            "channel_prefix must be non-empty without whitespace, got '{}'",
            config.channel_prefix
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_empty_user_agent() {
        let mut config = Config::default();
        config.crawler.user_agent = "  ".to_string();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_request_timeout() {
        let mut config = Config::default();
        config.crawler.request_timeout = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_tick_interval_too_small() {
        let mut config = Config::default();
        config.scheduler.tick_interval = 5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_database_path() {
        let mut config = Config::default();
        config.storage.database_path = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_redis_scheme() {
        let mut config = Config::default();
        config.pubsub.redis_url = Some("http://127.0.0.1:6379".to_string());
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_valid_redis_url() {
        let mut config = Config::default();
        config.pubsub.redis_url = Some("redis://127.0.0.1:6379/0".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_channel_prefix_with_whitespace() {
        let mut config = Config::default();
        config.pubsub.channel_prefix = "news cover".to_string();
        assert!(validate(&config).is_err());
    }
}
