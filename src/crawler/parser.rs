//! Document parsers for reporters
//!
//! A parser turns a fetched body into a [`Document`]: the readable fields of
//! the page itself plus the raw link targets found in it. Links are returned
//! unresolved; the reporter resolves them against the schedule root.
//!
//! - [`HtmlParser`]: `<a href>` and canonical links, metadata from `<meta>`
//! - [`FeedParser`]: RSS/Atom/JSON feeds, one link per entry

use chrono::{DateTime, Utc};
use feed_rs::parser as feed_parser;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

/// Errors raised while parsing a fetched body
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid feed: {0}")]
    Feed(String),

    #[error("Invalid selector: {0}")]
    Selector(String),
}

/// Readable fields extracted from one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readable {
    pub title: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub text: Option<String>,
    pub image: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// A parsed body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub readable: Readable,

    /// Link targets in document order, as written in the source
    pub links: Vec<String>,
}

/// Turns fetched bodies into documents
pub trait Parser: Send + Sync {
    fn parse(&self, url: &str, body: &str) -> Result<Document, ParseError>;
}

/// Parser for HTML pages
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlParser;

impl Parser for HtmlParser {
    fn parse(&self, _url: &str, body: &str) -> Result<Document, ParseError> {
        let document = Html::parse_document(body);

        let readable = Readable {
            title: meta_content(&document, "meta[property='og:title']")?
                .or(first_text(&document, "title")?),
            author: meta_content(&document, "meta[name='author']")?,
            summary: meta_content(&document, "meta[name='description']")?
                .or(meta_content(&document, "meta[property='og:description']")?),
            text: first_text(&document, "article")?.or(first_text(&document, "body")?),
            image: meta_content(&document, "meta[property='og:image']")?,
            published_at: meta_content(&document, "meta[property='article:published_time']")?
                .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        };

        Ok(Document {
            readable,
            links: extract_links(body),
        })
    }
}

/// Parser for RSS, Atom and JSON feeds
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedParser;

impl Parser for FeedParser {
    fn parse(&self, _url: &str, body: &str) -> Result<Document, ParseError> {
        let feed =
            feed_parser::parse(body.as_bytes()).map_err(|e| ParseError::Feed(e.to_string()))?;

        let links = feed
            .entries
            .iter()
            .filter_map(|entry| entry.links.first().map(|l| l.href.clone()))
            .collect();

        let readable = Readable {
            title: feed.title.map(|t| t.content),
            author: feed.authors.first().map(|a| a.name.clone()),
            summary: feed.description.map(|d| d.content),
            text: None,
            image: feed.logo.or(feed.icon).map(|i| i.uri),
            published_at: feed.published.or(feed.updated),
        };

        Ok(Document { readable, links })
    }
}

/// Extracts link targets from an HTML body
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` targets
/// - Fragment-only targets (`#section`)
pub fn extract_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href").and_then(followable) {
                links.push(href);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(href) = element.value().attr("href").and_then(followable) {
                links.push(href);
            }
        }
    }

    links
}

fn followable(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    let skipped = ["javascript:", "mailto:", "tel:", "data:"];
    if skipped.iter().any(|scheme| lower.starts_with(scheme)) {
        return None;
    }

    Some(href.to_string())
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|e| ParseError::Selector(format!("{}: {:?}", css, e)))
}

fn meta_content(document: &Html, css: &str) -> Result<Option<String>, ParseError> {
    let selector = selector(css)?;
    Ok(document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty()))
}

fn first_text(document: &Html, css: &str) -> Result<Option<String>, ParseError> {
    let selector = selector(css)?;
    Ok(document.select(&selector).next().and_then(collapsed_text))
}

fn collapsed_text(element: ElementRef<'_>) -> Option<String> {
    let text = element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}
