//! Worthiness filter
//!
//! Decides whether a discovered link should be visited and whether a fetched
//! item should be kept. Both predicates are pure over a schedule's
//! [`FilterOptions`].

use crate::storage::News;
use crate::url::{depth, file_extension, is_sub_url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Per-schedule filter options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    /// Links are only followed from nodes closer than this to the root
    #[serde(default)]
    pub max_dist: Option<u32>,

    /// Maximum path depth of a child URL below the root
    #[serde(default)]
    pub max_depth: Option<usize>,

    /// Maximum number of URLs claimed in one cover
    #[serde(default)]
    pub max_visit: Option<usize>,

    /// File extensions never visited, without the leading dot
    #[serde(default)]
    pub blacklist: BTreeSet<String>,

    /// Alternate roots whose sub-URLs belong to the same crawl scope
    #[serde(default)]
    pub brothers: Vec<String>,
}

impl FilterOptions {
    /// Adds an extension to the blacklist (`".PDF"` and `"pdf"` are the same)
    pub fn blacklist_extension(&mut self, ext: &str) {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        if !ext.is_empty() {
            self.blacklist.insert(ext);
        }
    }

    fn is_blacklisted(&self, url: &str) -> bool {
        match file_extension(url) {
            Some(ext) => self
                .blacklist
                .iter()
                .any(|b| b.trim_start_matches('.').eq_ignore_ascii_case(&ext)),
            None => false,
        }
    }
}

/// Returns true if `candidate` should be visited
///
/// # Rules
///
/// | Check | Passes when |
/// |-------|-------------|
/// | format | a child of `root` within `max_depth`, or a sub-URL of any brother |
/// | distance | `distance < max_dist` (unset passes) |
/// | extension | the file extension is not blacklisted |
/// | dedup | the URL was not already visited in this cover |
///
/// Brother URLs are never depth-filtered.
///
/// # Arguments
///
/// * `root` - The schedule's root URL
/// * `candidate` - The resolved, normalized link
/// * `distance` - Distance from the root of the node that found the link
/// * `options` - The schedule's filter options
/// * `already_visited` - Whether the cover already claimed `candidate`
pub fn worth_to_visit(
    root: &str,
    candidate: &str,
    distance: u32,
    options: &FilterOptions,
    already_visited: bool,
) -> bool {
    let is_child = is_sub_url(root, candidate);
    let is_relative = options
        .brothers
        .iter()
        .any(|brother| is_sub_url(brother, candidate));

    let depth_ok = match options.max_depth {
        None => true,
        Some(max) => depth(root, candidate).map_or(false, |d| d <= max),
    };
    let dist_ok = options.max_dist.map_or(true, |max| distance < max);
    let ext_ok = !options.is_blacklisted(candidate);
    let format_ok = (is_child && depth_ok) || is_relative;

    format_ok && dist_ok && ext_ok && !already_visited
}

/// Pluggable predicate deciding whether a fetched item is kept
#[derive(Clone)]
pub struct ReportFilter(Arc<dyn Fn(&News) -> bool + Send + Sync>);

impl ReportFilter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&News) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    pub fn worth_to_report(&self, item: &News) -> bool {
        (self.0)(item)
    }
}

impl Default for ReportFilter {
    fn default() -> Self {
        Self::new(|_| true)
    }
}

impl fmt::Debug for ReportFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReportFilter(..)")
    }
}
