//! Reporters: the nodes of a cover's traversal tree
//!
//! Every reporter fetches one URL, keeps the resulting item if it is worth
//! reporting, selects worthy links from it and dispatches one child per link,
//! all children concurrently. Run-scoped state (visited set, items fetched so
//! far, intel) lives in a [`RunContext`] shared by every node of the tree.
//!
//! # State Machine
//!
//! ```text
//! Created -> Fetching -> {Fetched | FetchFailed} -> Dispatching -> Done
//! Created -> Fetched   (intel nodes skip the fetch)
//! ```

use super::fetcher::{fetch_url, FetchResult};
use super::parser::{Document, FeedParser, HtmlParser, Parser};
use super::pipeline::Pipeline;
use crate::filter::{worth_to_visit, ReportFilter};
use crate::state::NodeState;
use crate::storage::{Backend, News, Schedule};
use crate::url::{depth, fill_url, normalize};
use crate::{CoverError, Result};
use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

pub type FetchFuture = BoxFuture<'static, Result<Option<News>>>;

/// Fetch step: `Ok(None)` is a failed fetch, `Err` a store error
pub type FetchFn = Arc<dyn Fn(Arc<Reporter>) -> FetchFuture + Send + Sync>;

pub type DispatchFuture = BoxFuture<'static, Result<Vec<News>>>;

/// Dispatch step, called with the bulk-report flag
pub type DispatchFn = Arc<dyn Fn(Arc<Reporter>, bool) -> DispatchFuture + Send + Sync>;

/// The kind of a reporter, selecting how its body is parsed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReporterKind {
    /// HTML page; children are the page's anchors
    #[default]
    Page,

    /// RSS/Atom feed; children are the entries' links
    Feed,
}

impl ReporterKind {
    /// Kind of the reporters dispatched from this one
    pub fn child_kind(&self) -> Self {
        Self::Page
    }

    pub fn default_parser(&self) -> Arc<dyn Parser> {
        match self {
            Self::Page => Arc::new(HtmlParser),
            Self::Feed => Arc::new(FeedParser),
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Feed => "feed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "page" => Some(Self::Page),
            "feed" => Some(Self::Feed),
            _ => None,
        }
    }
}

impl fmt::Display for ReporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Parser used for each reporter kind
#[derive(Clone)]
pub struct ParserSet {
    page: Arc<dyn Parser>,
    feed: Arc<dyn Parser>,
}

impl ParserSet {
    pub fn set(&mut self, kind: ReporterKind, parser: Arc<dyn Parser>) {
        match kind {
            ReporterKind::Page => self.page = parser,
            ReporterKind::Feed => self.feed = parser,
        }
    }

    pub fn get(&self, kind: ReporterKind) -> &Arc<dyn Parser> {
        match kind {
            ReporterKind::Page => &self.page,
            ReporterKind::Feed => &self.feed,
        }
    }
}

impl Default for ParserSet {
    fn default() -> Self {
        Self {
            page: ReporterKind::Page.default_parser(),
            feed: ReporterKind::Feed.default_parser(),
        }
    }
}

/// State shared by every reporter of one cover run
pub struct RunContext {
    schedule: Schedule,
    backend: Arc<dyn Backend>,
    client: Client,
    parsers: ParserSet,
    report_filter: ReportFilter,
    fetch_limit: Option<Arc<Semaphore>>,

    /// Intel items keyed by the URL of the item that linked to them
    intel: HashMap<String, Vec<News>>,

    visited: Mutex<HashSet<String>>,

    /// Items built during this run, keyed by URL
    items: Mutex<HashMap<String, News>>,
}

impl RunContext {
    pub fn new(schedule: Schedule, backend: Arc<dyn Backend>, client: Client) -> Self {
        Self {
            schedule,
            backend,
            client,
            parsers: ParserSet::default(),
            report_filter: ReportFilter::default(),
            fetch_limit: None,
            intel: HashMap::new(),
            visited: Mutex::new(HashSet::new()),
            items: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_parsers(mut self, parsers: ParserSet) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn with_report_filter(mut self, filter: ReportFilter) -> Self {
        self.report_filter = filter;
        self
    }

    /// Bounds the number of in-flight fetches of the run
    pub fn with_fetch_limit(mut self, limit: Option<usize>) -> Self {
        self.fetch_limit = limit.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self
    }

    /// Seeds the run with items from a previous run
    ///
    /// Items without a source (the previous root) are ignored; the chief
    /// always fetches the root again.
    pub fn with_intel(mut self, items: Vec<News>) -> Self {
        for item in items {
            if let Some(source) = item.source.clone() {
                self.intel.entry(normalize(&source)).or_default().push(item);
            }
        }
        self
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub async fn visited_count(&self) -> usize {
        self.visited.lock().await.len()
    }

    pub async fn is_visited(&self, url: &str) -> bool {
        self.visited.lock().await.contains(url)
    }

    /// Checks a candidate and marks it visited in one step
    ///
    /// Returns true if the caller now owns the URL for this run.
    async fn claim(&self, url: &str, distance: u32) -> bool {
        let mut visited = self.visited.lock().await;
        if self.visit_cap_reached(visited.len()) {
            return false;
        }

        let worthy = worth_to_visit(
            &self.schedule.url,
            url,
            distance,
            &self.schedule.options,
            visited.contains(url),
        );
        if worthy {
            visited.insert(url.to_string());
        }
        worthy
    }

    /// Claims an intel URL; only the visited set and the visit cap apply
    async fn claim_intel(&self, url: &str) -> bool {
        let mut visited = self.visited.lock().await;
        if self.visit_cap_reached(visited.len()) {
            return false;
        }
        visited.insert(url.to_string())
    }

    async fn mark_visited(&self, url: &str) {
        self.visited.lock().await.insert(url.to_string());
    }

    fn visit_cap_reached(&self, claimed: usize) -> bool {
        self.schedule
            .options
            .max_visit
            .map_or(false, |max| claimed >= max)
    }

    fn intel_for(&self, url: &str) -> &[News] {
        self.intel.get(url).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Depth below the root, or below the first brother containing `url`
    fn depth_of(&self, url: &str) -> usize {
        depth(&self.schedule.url, url)
            .or_else(|| {
                self.schedule
                    .options
                    .brothers
                    .iter()
                    .find_map(|brother| depth(brother, url))
            })
            .unwrap_or(0)
    }
}

/// One node of a cover's traversal tree
pub struct Reporter {
    url: String,
    kind: ReporterKind,
    distance: u32,
    ctx: Arc<RunContext>,
    parent: Option<Arc<Reporter>>,
    state: Mutex<NodeState>,

    /// Item carried over from a previous run; skips the fetch
    intel: Option<News>,

    /// Item produced by this node's fetch (or its intel)
    item: Mutex<Option<News>>,

    /// Inherited by every child
    fetch_pipeline: Pipeline<FetchFn>,
    fetch: FetchFn,
    dispatch: DispatchFn,
}

impl Reporter {
    /// Builds the chief of a run for the context's schedule
    pub fn chief(
        ctx: Arc<RunContext>,
        kind: ReporterKind,
        fetch_pipeline: Pipeline<FetchFn>,
        dispatch_pipeline: Pipeline<DispatchFn>,
    ) -> Arc<Self> {
        let url = ctx.schedule.url.clone();
        Self::build(url, kind, 0, ctx, None, None, fetch_pipeline, &dispatch_pipeline)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        url: String,
        kind: ReporterKind,
        distance: u32,
        ctx: Arc<RunContext>,
        parent: Option<Arc<Reporter>>,
        intel: Option<News>,
        fetch_pipeline: Pipeline<FetchFn>,
        dispatch_pipeline: &Pipeline<DispatchFn>,
    ) -> Arc<Self> {
        let fetch = fetch_pipeline.compose(Arc::new(base_fetch));
        let dispatch = dispatch_pipeline.compose(Arc::new(base_dispatch));

        Arc::new(Self {
            url: normalize(&url),
            kind,
            distance,
            ctx,
            parent,
            state: Mutex::new(NodeState::Created),
            intel,
            item: Mutex::new(None),
            fetch_pipeline,
            fetch,
            dispatch,
        })
    }

    fn child(self: &Arc<Self>, url: String, intel: Option<News>) -> Arc<Self> {
        Self::build(
            url,
            self.kind.child_kind(),
            self.distance + 1,
            Arc::clone(&self.ctx),
            Some(Arc::clone(self)),
            intel,
            self.fetch_pipeline.clone(),
            &Pipeline::new(),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> ReporterKind {
        self.kind
    }

    /// Hops from the chief
    pub fn distance(&self) -> u32 {
        self.distance
    }

    pub fn is_chief(&self) -> bool {
        self.parent.is_none()
    }

    pub fn parent(&self) -> Option<&Arc<Reporter>> {
        self.parent.as_ref()
    }

    /// The root node of this node's tree
    pub fn chief_node(self: &Arc<Self>) -> Arc<Reporter> {
        let mut node = Arc::clone(self);
        while let Some(parent) = node.parent.clone() {
            node = parent;
        }
        node
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    pub async fn state(&self) -> NodeState {
        *self.state.lock().await
    }

    /// Item this node fetched, once available
    pub async fn item(&self) -> Option<News> {
        self.item.lock().await.clone()
    }

    /// Runs the fetch step through this node's fetch pipeline
    pub fn fetch(self: &Arc<Self>) -> FetchFuture {
        (self.fetch)(Arc::clone(self))
    }

    /// Runs the dispatch step through this node's dispatch pipeline
    pub fn dispatch(self: &Arc<Self>, bulk: bool) -> DispatchFuture {
        (self.dispatch)(Arc::clone(self), bulk)
    }

    async fn transition(&self, next: NodeState) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.can_transition_to(next) {
            return Err(CoverError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        *state = next;
        Ok(())
    }

    /// Settles the fetch outcome when a middleware answered without the base fetch
    async fn settle_fetch(&self, fetched: bool) {
        let mut state = self.state.lock().await;
        if !state.has_fetched() {
            *state = if fetched {
                NodeState::Fetched
            } else {
                NodeState::FetchFailed
            };
        }
    }

    fn parse(&self, body: &str) -> Document {
        match self.ctx.parsers.get(self.kind).parse(&self.url, body) {
            Ok(document) => document,
            Err(e) => {
                debug!(url = %self.url, error = %e, "Unparsable body");
                Document::default()
            }
        }
    }

    /// Builds the item for a fetched body
    ///
    /// An item already built in this run or stored by an earlier run is
    /// updated in place; otherwise a new item is created.
    pub async fn make_item(&self, body: String) -> Result<News> {
        let source = match &self.parent {
            Some(parent) => parent.item().await.map(|item| item.url),
            None => None,
        };
        let readable = self.parse(&body).readable;

        let mut items = self.ctx.items.lock().await;
        let mut news = match items.remove(&self.url) {
            Some(existing) => existing,
            None => match self.ctx.backend.get_news(self.ctx.schedule.id, &self.url)? {
                Some(stored) => stored,
                None => {
                    let mut fresh = News::new(self.ctx.schedule.id, &self.url);
                    fresh.distance = self.distance;
                    fresh.depth = self.ctx.depth_of(&self.url);
                    fresh
                }
            },
        };

        news.content = body;
        news.source = source;
        news.title = readable.title;
        news.author = readable.author;
        news.summary = readable.summary;
        news.text = readable.text;
        news.image = readable.image;
        news.published_at = readable.published_at;
        news.fetched_at = Utc::now();

        items.insert(self.url.clone(), news.clone());
        Ok(news)
    }

    /// Claims worthy links of `item` and the intel found under this node
    async fn spawn_children(self: &Arc<Self>, item: Option<&News>) -> Vec<Arc<Reporter>> {
        let ctx = &self.ctx;
        let mut children = Vec::new();

        // intel takes precedence over fresh links
        for intel in ctx.intel_for(&self.url) {
            if ctx.claim_intel(&intel.url).await {
                children.push(self.child(intel.url.clone(), Some(intel.clone())));
            }
        }

        if let Some(item) = item {
            let mut seen = HashSet::new();
            let candidates: Vec<String> = self
                .parse(&item.content)
                .links
                .iter()
                .map(|link| fill_url(&ctx.schedule.url, link))
                .filter(|url| seen.insert(url.clone()))
                .collect();

            let claims = join_all(candidates.iter().map(|url| ctx.claim(url, self.distance))).await;
            for (url, claimed) in candidates.into_iter().zip(claims) {
                if claimed {
                    children.push(self.child(url, None));
                }
            }
        }

        children
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("url", &self.url)
            .field("kind", &self.kind)
            .field("distance", &self.distance)
            .field("chief", &self.is_chief())
            .finish()
    }
}

/// Fetches the node's URL and builds its item
fn base_fetch(node: Arc<Reporter>) -> FetchFuture {
    Box::pin(async move {
        node.transition(NodeState::Fetching).await?;
        let ctx = Arc::clone(&node.ctx);

        let permit = match &ctx.fetch_limit {
            Some(limit) => Arc::clone(limit).acquire_owned().await.ok(),
            None => None,
        };
        let result = fetch_url(&ctx.client, &node.url).await;
        drop(permit);

        match result {
            FetchResult::Success { body, .. } => {
                ctx.mark_visited(&node.url).await;
                let item = node.make_item(body).await?;
                node.transition(NodeState::Fetched).await?;
                debug!(url = %node.url, distance = node.distance, "Fetched");
                Ok(Some(item))
            }
            FetchResult::HttpError { status_code } => {
                debug!(url = %node.url, status_code, "Fetch failed");
                node.transition(NodeState::FetchFailed).await?;
                Ok(None)
            }
            FetchResult::NetworkError { error } => {
                debug!(url = %node.url, error = %error, "Fetch failed");
                node.transition(NodeState::FetchFailed).await?;
                Ok(None)
            }
        }
    })
}

/// Fetches, reports, then dispatches every worthy child concurrently
fn base_dispatch(node: Arc<Reporter>, bulk: bool) -> DispatchFuture {
    Box::pin(async move {
        let ctx = Arc::clone(&node.ctx);
        if node.is_chief() {
            ctx.mark_visited(&node.url).await;
        }

        let fetched = match node.intel.clone() {
            Some(intel) => {
                node.transition(NodeState::Fetched).await?;
                Some(intel)
            }
            None => {
                let fetched = node.fetch().await?;
                node.settle_fetch(fetched.is_some()).await;
                fetched
            }
        };
        node.transition(NodeState::Dispatching).await?;
        *node.item.lock().await = fetched.clone();

        let reported = fetched.filter(|item| ctx.report_filter.worth_to_report(item));
        if let Some(item) = &reported {
            if !bulk {
                ctx.backend.save_news(std::slice::from_ref(item))?;
            }
        }

        let children = node.spawn_children(reported.as_ref()).await;
        let results = join_all(children.iter().map(|child| child.dispatch(bulk))).await;

        let mut aggregate: Vec<News> = reported.into_iter().collect();
        for (child, result) in children.iter().zip(results) {
            match result {
                Ok(items) => aggregate.extend(items),
                Err(e) => warn!(url = %child.url, error = %e, "Dropping failed subtree"),
            }
        }

        if node.is_chief() {
            let mut seen = HashSet::new();
            aggregate.retain(|item| seen.insert(item.url.clone()));
            if bulk {
                ctx.backend.save_news(&aggregate)?;
            }
        }

        node.transition(NodeState::Done).await?;
        Ok(aggregate)
    })
}
