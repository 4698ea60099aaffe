//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for reporters:
//! - Building the shared HTTP client with the configured user agent
//! - Issuing one GET per reporter
//! - Classifying the outcome; only HTTP 200 counts as a successful fetch

use crate::config::CrawlerConfig;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    /// The server answered 200
    Success {
        /// Final URL after redirects
        final_url: String,
        /// Content-Type header value
        content_type: String,
        /// Response body
        body: String,
    },

    /// Any status other than 200
    HttpError {
        /// The HTTP status code
        status_code: u16,
    },

    /// Transport failure (connection refused, timeout, body read error)
    NetworkError {
        /// Error description
        error: String,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Builds an HTTP client from the crawler configuration
///
/// # Example
///
/// ```no_run
/// use newscover::config::CrawlerConfig;
/// use newscover::crawler::build_http_client;
///
/// let client = build_http_client(&CrawlerConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.request_timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a URL and classifies the outcome
///
/// | Condition | Result |
/// |-----------|--------|
/// | HTTP 200 | `Success` |
/// | Any other status | `HttpError` |
/// | Timeout, refused connection, unreadable body | `NetworkError` |
///
/// Nothing is retried here; retries belong in a request middleware.
pub async fn fetch_url(client: &Client, url: &str) -> FetchResult {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => {
            let error = if e.is_timeout() {
                "Request timeout".to_string()
            } else if e.is_connect() {
                "Connection refused".to_string()
            } else {
                e.to_string()
            };
            return FetchResult::NetworkError { error };
        }
    };

    let status = response.status();
    if status != StatusCode::OK {
        return FetchResult::HttpError {
            status_code: status.as_u16(),
        };
    }

    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    match response.text().await {
        Ok(body) => FetchResult::Success {
            final_url,
            content_type,
            body,
        },
        Err(e) => FetchResult::NetworkError {
            error: e.to_string(),
        },
    }
}
