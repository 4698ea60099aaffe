//! Cover: one complete crawl run for one schedule
//!
//! A cover builds the chief reporter for its schedule, wires the middleware
//! lists onto it and drives the chief's dispatch until the whole tree is
//! drained. Each run gets a fresh [`RunContext`], so a cover can be run
//! again on the next cycle with the same middlewares.

use super::fetcher::build_http_client;
use super::parser::Parser;
use super::pipeline::{DispatchMiddleware, FetchMiddleware, Pipeline};
use super::reporter::{DispatchFn, FetchFn, ParserSet, Reporter, ReporterKind, RunContext};
use crate::config::CrawlerConfig;
use crate::filter::ReportFilter;
use crate::storage::{Backend, News, Schedule};
use crate::{CoverError, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Middleware lists wired by [`Cover::prepare`]
#[derive(Debug, Clone)]
struct Wiring {
    kind: ReporterKind,
    fetch: Pipeline<FetchFn>,
    dispatch: Pipeline<DispatchFn>,
}

/// One crawl run for one schedule
pub struct Cover {
    schedule: Schedule,
    backend: Arc<dyn Backend>,
    client: Client,
    parsers: ParserSet,
    report_filter: ReportFilter,
    intel: Vec<News>,
    fetch_limit: Option<usize>,
    deadline: Option<Duration>,
    wiring: Option<Wiring>,
    chief: Option<Arc<Reporter>>,
}

impl Cover {
    pub fn new(schedule: Schedule, backend: Arc<dyn Backend>, client: Client) -> Self {
        Self {
            schedule,
            backend,
            client,
            parsers: ParserSet::default(),
            report_filter: ReportFilter::default(),
            intel: Vec::new(),
            fetch_limit: None,
            deadline: None,
            wiring: None,
            chief: None,
        }
    }

    /// Creates a cover with its own HTTP client, fetch limit and deadline
    pub fn from_config(
        schedule: Schedule,
        backend: Arc<dyn Backend>,
        config: &CrawlerConfig,
    ) -> Result<Self> {
        let client = build_http_client(config)?;
        Ok(Self::new(schedule, backend, client)
            .with_fetch_limit(config.fetch_limit())
            .with_deadline(config.run_deadline()))
    }

    pub fn with_report_filter(mut self, filter: ReportFilter) -> Self {
        self.report_filter = filter;
        self
    }

    pub fn with_parser(mut self, kind: ReporterKind, parser: Arc<dyn Parser>) -> Self {
        self.parsers.set(kind, parser);
        self
    }

    /// Replays items of a previous run instead of fetching them again
    ///
    /// Intel is never loaded implicitly. Scheduled and CLI covers start
    /// without it, so callers that want a replay pass the items here.
    pub fn with_intel(mut self, items: Vec<News>) -> Self {
        self.intel = items;
        self
    }

    pub fn with_fetch_limit(mut self, limit: Option<usize>) -> Self {
        self.fetch_limit = limit;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Chief of the prepared, not yet run, tree
    pub fn chief(&self) -> Option<&Arc<Reporter>> {
        self.chief.as_ref()
    }

    /// Builds the chief reporter for the schedule
    ///
    /// Request middlewares followed by response middlewares wrap every
    /// reporter's fetch; report middlewares wrap the chief's dispatch only.
    pub fn prepare(
        &mut self,
        kind: ReporterKind,
        request: Vec<FetchMiddleware>,
        response: Vec<FetchMiddleware>,
        report: Vec<DispatchMiddleware>,
    ) -> Arc<Reporter> {
        let wiring = Wiring {
            kind,
            fetch: request.into_iter().chain(response).collect(),
            dispatch: report.into_iter().collect(),
        };
        let chief = self.build_chief(&wiring);
        self.wiring = Some(wiring);
        self.chief = Some(Arc::clone(&chief));
        chief
    }

    fn build_chief(&self, wiring: &Wiring) -> Arc<Reporter> {
        let ctx = RunContext::new(
            self.schedule.clone(),
            Arc::clone(&self.backend),
            self.client.clone(),
        )
        .with_parsers(self.parsers.clone())
        .with_report_filter(self.report_filter.clone())
        .with_fetch_limit(self.fetch_limit)
        .with_intel(self.intel.clone());

        Reporter::chief(
            Arc::new(ctx),
            wiring.kind,
            wiring.fetch.clone(),
            wiring.dispatch.clone(),
        )
    }

    /// Runs the cover until the whole tree is drained
    ///
    /// Prepares with the schedule's kind and no middlewares if
    /// [`prepare`](Self::prepare) was not called. With `bulk` set, every
    /// kept item is saved in one call at the end; otherwise each item is
    /// saved as soon as it is fetched.
    pub async fn run(&mut self, bulk: bool) -> Result<Vec<News>> {
        let chief = match self.chief.take() {
            Some(chief) => chief,
            None => {
                let wiring = self.wiring.clone().unwrap_or_else(|| Wiring {
                    kind: self.schedule.kind,
                    fetch: Pipeline::new(),
                    dispatch: Pipeline::new(),
                });
                let chief = self.build_chief(&wiring);
                self.wiring = Some(wiring);
                chief
            }
        };

        info!(
            schedule_id = self.schedule.id,
            url = %self.schedule.url,
            bulk,
            "Starting cover"
        );
        let started = Instant::now();

        let items = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, chief.dispatch(bulk))
                .await
                .map_err(|_| CoverError::Deadline {
                    schedule_id: self.schedule.id,
                    seconds: deadline.as_secs(),
                })??,
            None => chief.dispatch(bulk).await?,
        };

        let visited = chief.context().visited_count().await;
        info!(
            schedule_id = self.schedule.id,
            items = items.len(),
            visited,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cover complete"
        );
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::parser::{Document, ParseError, Readable};
    use crate::crawler::pipeline::fetch_middleware;
    use crate::storage::MemoryBackend;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn schedule(url: &str) -> Schedule {
        let mut schedule = Schedule::new("tester", url, Duration::from_secs(60));
        schedule.id = 7;
        schedule
    }

    async fn page(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_run_without_prepare() {
        let server = MockServer::start().await;
        page(&server, "/", r#"<a href="/a">a</a>"#).await;
        page(&server, "/a", "leaf").await;

        let backend = Arc::new(MemoryBackend::new());
        let mut cover = Cover::new(schedule(&server.uri()), backend.clone(), Client::new());
        assert!(cover.chief().is_none());

        let items = cover.run(true).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(backend.list_news(7).unwrap().len(), 2);
        assert_eq!(backend.save_calls(), 1);
    }

    #[test]
    fn test_run_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let backend = Arc::new(MemoryBackend::new());
        let mut cover = Cover::new(schedule("http://root.com"), backend, Client::new());
        let run = cover.run(true);
        assert_send(&run);
    }

    #[tokio::test]
    async fn test_incremental_saves_per_item() {
        let server = MockServer::start().await;
        page(&server, "/", r#"<a href="/a">a</a><a href="/b">b</a>"#).await;
        page(&server, "/a", "leaf").await;
        page(&server, "/b", "leaf").await;

        let backend = Arc::new(MemoryBackend::new());
        let mut cover = Cover::new(schedule(&server.uri()), backend.clone(), Client::new());
        let items = cover.run(false).await.unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(backend.save_calls(), 3);
        assert_eq!(backend.list_news(7).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_request_middlewares_run_before_response_middlewares() {
        let server = MockServer::start().await;
        page(&server, "/", "root").await;

        let log = Arc::new(Mutex::new(Vec::new()));
        let tagged = |name: &'static str| {
            let log = Arc::clone(&log);
            fetch_middleware(move |node, next| {
                let log = Arc::clone(&log);
                Box::pin(async move {
                    log.lock().unwrap().push(name);
                    next(node).await
                })
            })
        };

        let backend = Arc::new(MemoryBackend::new());
        let mut cover = Cover::new(schedule(&server.uri()), backend, Client::new());
        cover.prepare(
            ReporterKind::Page,
            vec![tagged("request")],
            vec![tagged("response")],
            vec![],
        );
        cover.run(true).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["request", "response"]);
    }

    #[tokio::test]
    async fn test_fetch_limit_serializes_requests() {
        let server = MockServer::start().await;
        page(
            &server,
            "/",
            r#"<a href="/1">1</a><a href="/2">2</a><a href="/3">3</a><a href="/4">4</a>"#,
        )
        .await;
        for route in ["/1", "/2", "/3", "/4"] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_raw("leaf", "text/html")
                        .set_delay(Duration::from_millis(200)),
                )
                .mount(&server)
                .await;
        }

        let backend = Arc::new(MemoryBackend::new());
        let mut cover = Cover::new(schedule(&server.uri()), backend, Client::new())
            .with_fetch_limit(Some(1));

        let started = std::time::Instant::now();
        let items = cover.run(true).await.unwrap();

        assert_eq!(items.len(), 5);
        assert!(started.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_cover_can_run_again() {
        let server = MockServer::start().await;
        page(&server, "/", "root").await;

        let backend = Arc::new(MemoryBackend::new());
        let mut cover = Cover::new(schedule(&server.uri()), backend.clone(), Client::new());
        cover.run(true).await.unwrap();
        cover.run(true).await.unwrap();

        assert_eq!(backend.list_news(7).unwrap().len(), 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_report_filter_discards_items() {
        let server = MockServer::start().await;
        page(&server, "/", r#"<title>Home</title><a href="/a">a</a>"#).await;
        page(&server, "/a", "untitled leaf").await;

        let backend = Arc::new(MemoryBackend::new());
        let mut cover = Cover::new(schedule(&server.uri()), backend, Client::new())
            .with_report_filter(ReportFilter::new(|item| item.title.is_some()));
        let items = cover.run(true).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, Some("Home".to_string()));
    }

    #[tokio::test]
    async fn test_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let backend = Arc::new(MemoryBackend::new());
        let mut cover = Cover::new(schedule(&server.uri()), backend, Client::new())
            .with_deadline(Some(Duration::from_millis(100)));

        let err = cover.run(true).await.unwrap_err();
        assert!(matches!(err, CoverError::Deadline { schedule_id: 7, .. }));
    }

    struct FixedLinks(Vec<String>);

    impl Parser for FixedLinks {
        fn parse(&self, _url: &str, _body: &str) -> std::result::Result<Document, ParseError> {
            Ok(Document {
                readable: Readable::default(),
                links: self.0.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_injected_parser() {
        let server = MockServer::start().await;
        page(&server, "/", "opaque").await;
        page(&server, "/x", "opaque").await;

        let backend = Arc::new(MemoryBackend::new());
        let mut cover = Cover::new(schedule(&server.uri()), backend, Client::new())
            .with_parser(ReporterKind::Page, Arc::new(FixedLinks(vec!["/x".to_string()])));
        let items = cover.run(true).await.unwrap();

        assert_eq!(items.len(), 2);
    }
}
