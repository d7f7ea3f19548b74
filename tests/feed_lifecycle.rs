//! Integration tests for a region's feed across runs: first publish, new
//! advisories, retention, and failed runs.
//!
//! Each test serves pages from its own mock server and writes feeds into its
//! own temporary directory.

use std::time::Duration;

use advisory_feeds::advisory::{identity_key, Category};
use advisory_feeds::feed::{FeedStore, Fetcher, RetryPolicy};
use advisory_feeds::runner::{Region, RegionError, RunSettings, Runner};
use pretty_assertions::assert_eq;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rainfall_div(number: u32, hour: &str) -> String {
    format!(
        "<div>Rainfall Advisory No. {number}<br>Rains over Samar and Leyte.<br>Issued at {hour}, 16 October 2026</div>"
    )
}

fn page(advisories: &[String]) -> String {
    format!(
        r#"<html><body>
  <h1>Visayas PRSD</h1>
  <div id="rainfalls">{}</div>
  <div id="thunderstorms"></div>
  <div id="special-forecasts"></div>
</body></html>"#,
        advisories.join("\n")
    )
}

async fn serve(server: &MockServer, body: String) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/regional-forecast/visprsd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn runner(server: &MockServer, dir: &tempfile::TempDir, max_items: usize) -> Runner {
    let base = Url::parse(&format!("{}/regional-forecast/", server.uri())).unwrap();
    let fetcher = Fetcher::new(reqwest::Client::new(), base).with_retry(RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(1),
    });
    Runner::new(
        fetcher,
        FeedStore::new(dir.path()),
        RunSettings {
            max_items,
            ..RunSettings::default()
        },
    )
}

fn titles(doc: &advisory_feeds::advisory::FeedDocument) -> Vec<&str> {
    doc.items.iter().map(|i| i.title.as_str()).collect()
}

#[tokio::test]
async fn test_new_advisories_are_prepended_across_runs() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&server, &dir, 50);
    let region = Region::all_categories("visprsd");

    serve(&server, page(&[rainfall_div(1, "8:00 AM")])).await;
    let first = runner.run_region(&region).await.unwrap();
    assert_eq!(first.inserted, 1);

    serve(
        &server,
        page(&[rainfall_div(2, "2:00 PM"), rainfall_div(1, "8:00 AM")]),
    )
    .await;
    let second = runner.run_region(&region).await.unwrap();
    assert_eq!(second.inserted, 1);

    let feed = runner.store().load("visprsd").await.unwrap();
    assert_eq!(
        titles(&feed),
        vec!["Rainfall Advisory No. 2", "Rainfall Advisory No. 1"]
    );
}

#[tokio::test]
async fn test_advisory_removed_from_page_stays_in_feed() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&server, &dir, 50);
    let region = Region::all_categories("visprsd");

    serve(
        &server,
        page(&[rainfall_div(2, "2:00 PM"), rainfall_div(1, "8:00 AM")]),
    )
    .await;
    runner.run_region(&region).await.unwrap();

    serve(&server, page(&[rainfall_div(2, "2:00 PM")])).await;
    let report = runner.run_region(&region).await.unwrap();

    assert_eq!(report.inserted, 0);
    assert_eq!(report.items, 2);
}

#[tokio::test]
async fn test_retention_bound_keeps_newest() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&server, &dir, 2);
    let region = Region::all_categories("visprsd");

    for (number, hour) in [(1, "8:00 AM"), (2, "11:00 AM"), (3, "2:00 PM")] {
        serve(&server, page(&[rainfall_div(number, hour)])).await;
        runner.run_region(&region).await.unwrap();
    }

    let feed = runner.store().load("visprsd").await.unwrap();
    assert_eq!(
        titles(&feed),
        vec!["Rainfall Advisory No. 3", "Rainfall Advisory No. 2"]
    );
}

#[tokio::test]
async fn test_published_file_is_rss_with_identity_guids() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&server, &dir, 50);

    serve(&server, page(&[rainfall_div(1, "8:00 AM")])).await;
    let report = runner
        .run_region(&Region::all_categories("visprsd"))
        .await
        .unwrap();

    let bytes = std::fs::read(&report.path).unwrap();
    let parsed = feed_rs::parser::parse(bytes.as_slice()).unwrap();
    assert_eq!(
        parsed.title.map(|t| t.content).as_deref(),
        Some("PAGASA VISPRSD Advisories")
    );
    assert_eq!(
        parsed.links.first().map(|l| l.href.clone()),
        Some(format!("{}/regional-forecast/visprsd", server.uri()))
    );
    assert!(parsed.updated.is_some());

    let feed = runner.store().load("visprsd").await.unwrap();
    let item = &feed.items[0];
    assert_eq!(item.category, Category::Rainfall);
    assert_eq!(
        item.identity_key,
        identity_key(item.category, &item.title, &item.body)
    );
}

#[tokio::test]
async fn test_failed_fetch_leaves_published_feed_unchanged() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(&server, &dir, 50);
    let region = Region::all_categories("visprsd");

    serve(&server, page(&[rainfall_div(1, "8:00 AM")])).await;
    let report = runner.run_region(&region).await.unwrap();
    let before = std::fs::read(&report.path).unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = runner.run_region(&region).await;
    assert!(matches!(result, Err(RegionError::Fetch(_))));
    assert_eq!(std::fs::read(&report.path).unwrap(), before);
}
