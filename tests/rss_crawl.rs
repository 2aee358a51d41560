//! RSS strategy over a mock server: entry mapping, sanitization, caps.

use std::collections::HashSet;
use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use intel_monitor::catalog::SourceDefinition;
use intel_monitor::crawler::{self, CrawlContext, CrawlStatus};
use intel_monitor::fetch::BrowserPool;
use intel_monitor::registry::build_fetcher;
use intel_monitor::storage::snapshot_store::SnapshotStore;

const FEED_XML: &str = include_str!("fixtures/blog_feed.xml");

fn rss_source(server_url: &str, max_entries: Option<usize>) -> SourceDefinition {
    let max = max_entries
        .map(|m| format!("max_entries: {m}\n"))
        .unwrap_or_default();
    serde_yaml::from_str(&format!(
        r#"
id: ex3
name: AI Research Blog
dimension: technology
url: "{server_url}/feed"
fetch_strategy: rss
schedule: 4h
request_delay_seconds: 0.0
{max}"#
    ))
    .unwrap()
}

fn ctx(dir: &std::path::Path) -> CrawlContext {
    CrawlContext {
        browser: Arc::new(BrowserPool::new(1)),
        snapshots: Arc::new(SnapshotStore::new(dir.to_path_buf())),
    }
}

#[tokio::test]
async fn feed_entries_become_items_with_sanitized_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(FEED_XML)
                .insert_header("content-type", "application/rss+xml"),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let def = rss_source(&server.uri(), None);
    let fetcher = build_fetcher(&def).unwrap();
    let result = crawler::run(&def, fetcher.as_ref(), &ctx(dir.path()), &HashSet::new()).await;

    assert_eq!(result.status, CrawlStatus::Success);
    assert_eq!(result.items_total, 3);

    let first = &result.items[0];
    assert_eq!(first.title, "New multimodal model released");
    assert_eq!(first.url, "https://blog.example/posts/multimodal-release");
    assert!(first.published_at.is_some());

    // Script injected through the description never reaches content_html.
    let html = first.content_html.as_deref().unwrap();
    assert!(!html.contains("script"));
    assert!(html.contains("<strong>video generation</strong>"));
    assert!(first.content.as_deref().unwrap().contains("video generation"));
    assert!(first.content_hash.is_some());
}

#[tokio::test]
async fn max_entries_caps_the_feed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED_XML))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let def = rss_source(&server.uri(), Some(2));
    let fetcher = build_fetcher(&def).unwrap();
    let result = crawler::run(&def, fetcher.as_ref(), &ctx(dir.path()), &HashSet::new()).await;
    assert_eq!(result.items_total, 2);
}

#[tokio::test]
async fn non_feed_body_is_a_failed_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not a feed</html>"))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let def = rss_source(&server.uri(), None);
    let fetcher = build_fetcher(&def).unwrap();
    let result = crawler::run(&def, fetcher.as_ref(), &ctx(dir.path()), &HashSet::new()).await;
    assert_eq!(result.status, CrawlStatus::Failed);
}
