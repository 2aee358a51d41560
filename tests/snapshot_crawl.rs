//! Snapshot strategy across three runs: capture, change diff, no-op.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use intel_monitor::catalog::SourceDefinition;
use intel_monitor::crawler::{self, CrawlContext, CrawlStatus};
use intel_monitor::fetch::BrowserPool;
use intel_monitor::registry::build_fetcher;
use intel_monitor::storage::snapshot_store::SnapshotStore;

fn snapshot_source(server_url: &str) -> SourceDefinition {
    serde_yaml::from_str(&format!(
        r##"
id: ex2
name: Leadership Roster
dimension: personnel
url: "{server_url}/leaders"
fetch_strategy: snapshot
schedule: weekly
request_delay_seconds: 0.0
content_area: "#roster"
ignore_patterns:
  - "浏览量[:：]\\s*\\d+"
"##
    ))
    .unwrap()
}

fn roster_page(entries: &[&str]) -> String {
    let lis: String = entries.iter().map(|e| format!("<li>{e}</li>")).collect();
    format!(
        r#"<html><body>
            <div id="nav">site chrome</div>
            <div id="roster"><ul>{lis}</ul><p>浏览量: 99</p></div>
        </body></html>"#
    )
}

async fn serve(server: &MockServer, body: String) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/leaders"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn three_run_change_detection_cycle() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let snapshots = Arc::new(SnapshotStore::new(dir.path().to_path_buf()));
    let ctx = CrawlContext {
        browser: Arc::new(BrowserPool::new(1)),
        snapshots: Arc::clone(&snapshots),
    };

    let def = snapshot_source(&server.uri());
    let fetcher = build_fetcher(&def).unwrap();
    let fragment_re = Regex::new(r".*#snapshot-[0-9a-f]{12}$").unwrap();

    // Run 1: first capture emits one item with the hash fragment.
    serve(&server, roster_page(&["A: Smith"])).await;
    let first = crawler::run(&def, fetcher.as_ref(), &ctx, &HashSet::new()).await;
    assert_eq!(first.status, CrawlStatus::Success);
    assert_eq!(first.items_total, 1);
    let first_item = &first.items[0];
    assert!(fragment_re.is_match(&first_item.url), "url: {}", first_item.url);
    assert!(first_item.content.as_deref().unwrap().starts_with("初次快照"));
    assert_eq!(first_item.extra["is_first_snapshot"], serde_json::json!(true));

    // Run 2: a new roster line produces a diff item with a distinct key.
    serve(&server, roster_page(&["A: Smith", "B: Jones"])).await;
    let second = crawler::run(&def, fetcher.as_ref(), &ctx, &HashSet::new()).await;
    assert_eq!(second.items_total, 1);
    let second_item = &second.items[0];
    assert!(fragment_re.is_match(&second_item.url));
    assert_ne!(second_item.url_hash, first_item.url_hash);
    assert!(second_item.content.as_deref().unwrap().contains("+ B: Jones"));

    // Run 3: unchanged content (view counter differs, but it is ignored).
    serve(&server, roster_page(&["A: Smith", "B: Jones"])).await;
    let third = crawler::run(&def, fetcher.as_ref(), &ctx, &HashSet::new()).await;
    assert_eq!(third.status, CrawlStatus::NoNewContent);
    assert_eq!(third.items_total, 0);

    // The store kept one record per version, newest retaining its text.
    let records = snapshots.load("ex2");
    assert_eq!(records.len(), 2);
    assert!(records[1].content_text.is_some());
}
