//! End-to-end covers against mock HTTP servers

use crate::common::{mount_page, schedule, sorted_urls};
use newscover::config::CrawlerConfig;
use newscover::crawler::fetch_middleware;
use newscover::storage::{Backend, MemoryBackend, SqliteBackend};
use newscover::{Cover, FilterOptions, ReporterKind, Schedule};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn cover(schedule: Schedule, backend: Arc<dyn Backend>) -> Cover {
    Cover::from_config(schedule, backend, &CrawlerConfig::default()).expect("cover")
}

#[tokio::test]
async fn test_full_cover_with_sqlite() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(
        &server,
        "/",
        &format!(
            r#"<a href="{0}/page1">1</a><a href="{0}/page2">2</a><a href="https://external.example/x">x</a>"#,
            base
        ),
        1,
    )
    .await;
    mount_page(&server, "/page1", r#"<a href="/page2">2</a><a href="/">home</a>"#, 1).await;
    mount_page(&server, "/page2", "leaf", 1).await;

    let dir = TempDir::new().unwrap();
    let backend = Arc::new(SqliteBackend::new(&dir.path().join("cover.db")).unwrap());
    let mut s = Schedule::new("tester", &base, Duration::from_secs(3600));
    backend.save_schedule(&mut s).unwrap();

    let items = cover(s.clone(), backend.clone()).run(true).await.unwrap();
    assert_eq!(
        sorted_urls(&items),
        vec![base.clone(), format!("{}/page1", base), format!("{}/page2", base)]
    );

    let stored = backend.list_news(s.id).unwrap();
    assert_eq!(stored.len(), 3);
    let page1 = stored.iter().find(|n| n.url.ends_with("/page1")).unwrap();
    assert_eq!(page1.source.as_deref(), Some(base.as_str()));
    assert_eq!(page1.distance, 1);
}

#[tokio::test]
async fn test_shared_link_fetched_once() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/a">a</a><a href="/b">b</a>"#, 1).await;
    mount_page(&server, "/a", r#"<a href="/c">c</a>"#, 1).await;
    mount_page(&server, "/b", r#"<a href="/c">c</a>"#, 1).await;
    mount_page(&server, "/c", "leaf", 1).await;

    let backend = Arc::new(MemoryBackend::new());
    let items = cover(schedule(1, &server.uri(), FilterOptions::default()), backend)
        .run(true)
        .await
        .unwrap();

    let shared: Vec<_> = items.iter().filter(|i| i.url.ends_with("/c")).collect();
    assert_eq!(shared.len(), 1);
    assert_eq!(items.len(), 4);
}

#[tokio::test]
async fn test_bulk_report_saves_everything_once() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/a">a</a><a href="/b">b</a>"#, 1).await;
    mount_page(&server, "/a", r#"<a href="/a/1">1</a>"#, 1).await;
    mount_page(&server, "/b", "leaf", 1).await;
    mount_page(&server, "/a/1", "leaf", 1).await;

    let backend = Arc::new(MemoryBackend::new());
    let items = cover(schedule(1, &server.uri(), FilterOptions::default()), backend.clone())
        .run(true)
        .await
        .unwrap();

    assert_eq!(backend.save_calls(), 1);
    assert_eq!(sorted_urls(&backend.list_news(1).unwrap()), sorted_urls(&items));
    assert_eq!(items.len(), 4);
}

#[tokio::test]
async fn test_failed_fetch_does_not_abort_siblings() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/broken">x</a><a href="/ok">ok</a>"#, 1).await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/ok", r#"<a href="/ok/deeper">d</a>"#, 1).await;
    mount_page(&server, "/ok/deeper", "leaf", 1).await;

    let backend = Arc::new(MemoryBackend::new());
    let items = cover(schedule(1, &server.uri(), FilterOptions::default()), backend)
        .run(true)
        .await
        .unwrap();

    let base = server.uri();
    assert_eq!(
        sorted_urls(&items),
        vec![base.clone(), format!("{}/ok", base), format!("{}/ok/deeper", base)]
    );
}

#[tokio::test]
async fn test_depth_and_blacklist_limits() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<a href="/x">x</a><a href="/x/y">xy</a><a href="/doc.pdf">pdf</a>"#,
        1,
    )
    .await;
    mount_page(&server, "/x", r#"<a href="/z">z</a>"#, 1).await;
    mount_page(&server, "/z", "leaf", 1).await;
    mount_page(&server, "/x/y", "too deep", 0).await;
    mount_page(&server, "/doc.pdf", "blacklisted", 0).await;

    let mut options = FilterOptions {
        max_depth: Some(1),
        ..Default::default()
    };
    options.blacklist_extension("pdf");

    let backend = Arc::new(MemoryBackend::new());
    let items = cover(schedule(1, &server.uri(), options), backend)
        .run(true)
        .await
        .unwrap();
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn test_distance_limit() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/a">a</a>"#, 1).await;
    mount_page(&server, "/a", r#"<a href="/b">b</a>"#, 1).await;
    mount_page(&server, "/b", "too far", 0).await;

    let options = FilterOptions {
        max_dist: Some(1),
        ..Default::default()
    };
    let backend = Arc::new(MemoryBackend::new());
    let items = cover(schedule(1, &server.uri(), options), backend)
        .run(true)
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn test_brother_domain_ignores_depth() {
    let server = MockServer::start().await;
    let brother = MockServer::start().await;

    mount_page(
        &server,
        "/",
        &format!(r#"<a href="{}/deep/path/page">b</a>"#, brother.uri()),
        1,
    )
    .await;
    mount_page(&brother, "/deep/path/page", "leaf", 1).await;

    let options = FilterOptions {
        max_depth: Some(0),
        brothers: vec![brother.uri()],
        ..Default::default()
    };
    let backend = Arc::new(MemoryBackend::new());
    let items = cover(schedule(1, &server.uri(), options), backend)
        .run(true)
        .await
        .unwrap();

    let found = items
        .iter()
        .find(|i| i.url.starts_with(&brother.uri()))
        .unwrap();
    assert_eq!(found.depth, 3);
}

#[tokio::test]
async fn test_feed_schedule() {
    let server = MockServer::start().await;
    let base = server.uri();
    let rss = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <item><title>One</title><link>{0}/news/1</link><guid>1</guid></item>
    <item><title>Two</title><link>{0}/news/2</link><guid>2</guid></item>
  </channel>
</rss>"#,
        base
    );
    Mock::given(method("GET"))
        .and(path("/news"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(rss, "application/rss+xml"),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/news/1", "<title>One</title>", 1).await;
    mount_page(&server, "/news/2", "<title>Two</title>", 1).await;

    let mut s = schedule(1, &format!("{}/news", base), FilterOptions::default());
    s.kind = ReporterKind::Feed;

    let backend = Arc::new(MemoryBackend::new());
    let items = cover(s, backend).run(true).await.unwrap();

    assert_eq!(items.len(), 3);
    let feed = items.iter().find(|i| i.url.ends_with("/news")).unwrap();
    assert_eq!(feed.title.as_deref(), Some("Test Feed"));
    let entry = items.iter().find(|i| i.url.ends_with("/news/1")).unwrap();
    assert_eq!(entry.title.as_deref(), Some("One"));
}

#[tokio::test]
async fn test_incremental_rerun_updates_in_place() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/a">a</a>"#, 2).await;
    mount_page(&server, "/a", "leaf", 2).await;

    let dir = TempDir::new().unwrap();
    let backend = Arc::new(SqliteBackend::new(&dir.path().join("rerun.db")).unwrap());
    let mut s = Schedule::new("tester", &server.uri(), Duration::from_secs(3600));
    backend.save_schedule(&mut s).unwrap();

    cover(s.clone(), backend.clone()).run(false).await.unwrap();
    let mut first: Vec<_> = backend.list_news(s.id).unwrap().into_iter().map(|n| n.id).collect();

    cover(s.clone(), backend.clone()).run(false).await.unwrap();
    let mut second: Vec<_> = backend.list_news(s.id).unwrap().into_iter().map(|n| n.id).collect();

    first.sort();
    second.sort();
    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_intel_replay_skips_fetch() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/a">a</a>"#, 2).await;
    mount_page(&server, "/a", "leaf", 1).await;

    let backend = Arc::new(MemoryBackend::new());
    let first = cover(schedule(1, &server.uri(), FilterOptions::default()), backend.clone())
        .run(true)
        .await
        .unwrap();

    let second = cover(schedule(1, &server.uri(), FilterOptions::default()), backend)
        .with_intel(first.clone())
        .run(true)
        .await
        .unwrap();

    assert_eq!(sorted_urls(&first), sorted_urls(&second));
}

#[tokio::test]
async fn test_prepared_middlewares_wrap_every_fetch() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/a">a</a>"#, 1).await;
    mount_page(&server, "/a", "leaf", 1).await;

    let log = Arc::new(Mutex::new(Vec::new()));
    let tagged = |name: &'static str| {
        let log = Arc::clone(&log);
        fetch_middleware(move |node, next| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(format!("{} {}", name, node.distance()));
                next(node).await
            })
        })
    };

    let backend = Arc::new(MemoryBackend::new());
    let mut cover = cover(schedule(1, &server.uri(), FilterOptions::default()), backend);
    cover.prepare(ReporterKind::Page, vec![tagged("A"), tagged("B")], vec![], vec![]);
    cover.run(true).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["A 0", "B 0", "A 1", "B 1"]);
}
