//! End-to-end static crawl against a mock HTTP server: list extraction,
//! URL-path dates, detail fetches, artifact delta on re-run.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use intel_monitor::catalog::SourceDefinition;
use intel_monitor::crawler::{self, CrawlContext, CrawlStatus};
use intel_monitor::fetch::BrowserPool;
use intel_monitor::registry::build_fetcher;
use intel_monitor::storage::raw_store::RawStore;
use intel_monitor::storage::snapshot_store::SnapshotStore;

fn source_for(server_url: &str) -> SourceDefinition {
    let yaml = format!(
        r##"
id: ex1
name: Example News
dimension: national_policy
url: "{server_url}/news/"
base_url: "{server_url}/news/"
fetch_strategy: static
schedule: daily
request_delay_seconds: 0.0
list_selectors:
  list_item: "ul.list li"
  title: "a"
  link: "a"
detail_selectors:
  content: "#content"
"##
    );
    serde_yaml::from_str(&yaml).expect("test source parses")
}

fn ctx(dir: &std::path::Path) -> CrawlContext {
    CrawlContext {
        browser: Arc::new(BrowserPool::new(1)),
        snapshots: Arc::new(SnapshotStore::new(dir.to_path_buf())),
    }
}

const LIST_HTML: &str = r#"
<html><body><ul class="list">
  <li><a href="t20260215_001.html">算力补贴新政发布</a></li>
  <li><a href="t20260220_002.html">人才引进办法更新</a></li>
</ul></body></html>
"#;

async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/news/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LIST_HTML))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/news/t20260215_001.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><div id="content"><p>补贴正文一</p></div></body></html>"#,
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/news/t20260220_002.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><div id="content"><p>办法正文二</p></div></body></html>"#,
        ))
        .mount(server)
        .await;
}

#[tokio::test]
async fn first_run_extracts_items_with_url_dates() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let def = source_for(&server.uri());
    let fetcher = build_fetcher(&def).unwrap();
    let result = crawler::run(&def, fetcher.as_ref(), &ctx(dir.path()), &HashSet::new()).await;

    assert_eq!(result.status, CrawlStatus::Success);
    assert_eq!(result.items_total, 2);
    assert_eq!(result.items_new, 2);

    let first = &result.items[0];
    let date = first.published_at.expect("date derived from URL path");
    assert_eq!((date.year(), date.month(), date.day()), (2026, 2, 15));
    assert_eq!(first.content.as_deref(), Some("补贴正文一"));
    assert!(first.content_hash.is_some());

    let second = &result.items[1];
    let date = second.published_at.unwrap();
    assert_eq!((date.year(), date.month(), date.day()), (2026, 2, 20));

    // Hash uniqueness inside one run.
    let hashes: HashSet<_> = result.items.iter().map(|i| i.url_hash.clone()).collect();
    assert_eq!(hashes.len(), 2);
}

#[tokio::test]
async fn rerun_with_unchanged_page_reports_no_new_content() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let def = source_for(&server.uri());
    let store = RawStore::new(dir.path().join("raw"));
    let context = ctx(dir.path());

    let fetcher = build_fetcher(&def).unwrap();
    let first = crawler::run(&def, fetcher.as_ref(), &context, &store.previous_hashes(&def)).await;
    assert_eq!(first.status, CrawlStatus::Success);
    store.save(&def, &first.items, Utc::now()).unwrap();

    let artifact = store.load(&def).unwrap().unwrap();
    assert_eq!(artifact.new_item_count, 2);
    assert!(artifact.items.iter().all(|i| i.is_new));

    // Second run sees every URL in the prior artifact.
    let second = crawler::run(&def, fetcher.as_ref(), &context, &store.previous_hashes(&def)).await;
    assert_eq!(second.status, CrawlStatus::NoNewContent);
    assert_eq!(second.items_total, 2);
    assert_eq!(second.items_new, 0);

    store.save(&def, &second.items, Utc::now()).unwrap();
    let artifact = store.load(&def).unwrap().unwrap();
    assert_eq!(artifact.new_item_count, 0);
    assert!(artifact.items.iter().all(|i| !i.is_new));
    assert!(artifact.previous_crawled_at.is_some());
}

#[tokio::test]
async fn missing_selector_fails_with_descriptive_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/news/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body><p>redesigned</p></body></html>"),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let def = source_for(&server.uri());
    let fetcher = build_fetcher(&def).unwrap();
    let result = crawler::run(&def, fetcher.as_ref(), &ctx(dir.path()), &HashSet::new()).await;

    assert_eq!(result.status, CrawlStatus::Failed);
    assert!(result.error_message.unwrap().contains("ul.list li"));
}

#[tokio::test]
async fn detail_failure_degrades_to_partial() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/news/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LIST_HTML))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/news/t20260215_001.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><div id="content"><p>正文</p></div></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/news/t20260220_002.html"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let def = source_for(&server.uri());
    let fetcher = build_fetcher(&def).unwrap();
    let result = crawler::run(&def, fetcher.as_ref(), &ctx(dir.path()), &HashSet::new()).await;

    // The broken detail page keeps its bare item; the run is partial.
    assert_eq!(result.status, CrawlStatus::Partial);
    assert_eq!(result.items_total, 2);
    assert!(result.items[1].content.is_none());
}
