use newscover::{FilterOptions, ReporterKind, Schedule};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate, Times};

/// Mounts an HTML page that must be requested `times` times
pub async fn mount_page(server: &MockServer, route: &str, body: &str, times: impl Into<Times>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(format!("<html><body>{}</body></html>", body), "text/html"),
        )
        .expect(times)
        .mount(server)
        .await;
}

pub fn schedule(id: i64, url: &str, options: FilterOptions) -> Schedule {
    let mut schedule = Schedule::new("tester", url, Duration::from_secs(3600))
        .with_kind(ReporterKind::Page)
        .with_options(options);
    schedule.id = id;
    schedule
}

pub fn sorted_urls(items: &[newscover::News]) -> Vec<String> {
    let mut urls: Vec<String> = items.iter().map(|i| i.url.clone()).collect();
    urls.sort();
    urls
}
