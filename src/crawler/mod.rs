//! Crawler core: the item/result model and the shared run protocol.
//!
//! Strategies return a partial item list plus per-item errors instead of
//! aborting a whole source; `run` wraps a strategy with timing, error
//! capture, dedup against the prior artifact, and status classification.
//! Nothing in here propagates a panic or an error to the scheduler.

pub mod dynamic;
pub mod faculty;
pub mod parsers;
pub mod rss;
pub mod snapshot;
pub mod static_html;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::SourceDefinition;
use crate::error::CrawlError;
use crate::fetch::BrowserPool;
use crate::urlnorm;

/// Outcome classification for one source run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Success,
    NoNewContent,
    Partial,
    Failed,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Success => "success",
            CrawlStatus::NoNewContent => "no_new_content",
            CrawlStatus::Partial => "partial",
            CrawlStatus::Failed => "failed",
        }
    }
}

/// A single article/item extracted by a fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledItem {
    pub title: String,
    pub url: String,
    pub url_hash: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub content_html: Option<String>,
    pub content_hash: Option<String>,
    pub source_id: String,
    pub dimension: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub is_new: bool,
}

impl CrawledItem {
    /// Construct with source metadata and the URL-derived dedup key filled in.
    pub fn new(title: impl Into<String>, url: impl Into<String>, def: &SourceDefinition) -> Self {
        let url = url.into();
        Self {
            title: title.into(),
            url_hash: urlnorm::url_hash(&url),
            url,
            published_at: None,
            author: None,
            summary: None,
            content: None,
            content_html: None,
            content_hash: None,
            source_id: def.id.clone(),
            dimension: def.dimension.clone(),
            tags: def.tags.clone(),
            extra: HashMap::new(),
            is_new: false,
        }
    }

    pub fn with_published_date(mut self, date: Option<NaiveDate>) -> Self {
        self.published_at = date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc());
        self
    }
}

/// What a strategy produced: items plus non-fatal per-item errors.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub items: Vec<CrawledItem>,
    pub item_errors: Vec<String>,
}

impl FetchOutcome {
    pub fn from_items(items: Vec<CrawledItem>) -> Self {
        Self {
            items,
            item_errors: Vec::new(),
        }
    }
}

/// Shared handles a strategy may need.
#[derive(Clone)]
pub struct CrawlContext {
    pub browser: Arc<BrowserPool>,
    pub snapshots: Arc<crate::storage::snapshot_store::SnapshotStore>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_and_parse(
        &self,
        def: &SourceDefinition,
        ctx: &CrawlContext,
    ) -> Result<FetchOutcome, CrawlError>;
}

/// One record per source run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub source_id: String,
    pub status: CrawlStatus,
    pub items_total: usize,
    pub items_new: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<CrawledItem>,
}

impl CrawlResult {
    fn empty(source_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.to_string(),
            status: CrawlStatus::Failed,
            items_total: 0,
            items_new: 0,
            started_at,
            ended_at: started_at,
            duration_seconds: 0.0,
            error_message: None,
            items: Vec::new(),
        }
    }
}

/// Drop items whose `url_hash` repeats within one crawl. Artifacts must have
/// unique keys or the delta comparison breaks.
fn dedup_within_run(items: Vec<CrawledItem>) -> Vec<CrawledItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.url_hash.clone()))
        .collect()
}

fn classify(items_new: usize, items_total: usize, item_errors: &[String]) -> CrawlStatus {
    if items_total == 0 && !item_errors.is_empty() {
        return CrawlStatus::Failed;
    }
    if items_new == 0 {
        return CrawlStatus::NoNewContent;
    }
    if item_errors.is_empty() {
        CrawlStatus::Success
    } else {
        CrawlStatus::Partial
    }
}

/// Run one fetcher for one source: timing, error capture, within-run dedup,
/// `is_new` marking against the prior artifact's hash set, classification.
pub async fn run(
    def: &SourceDefinition,
    fetcher: &dyn Fetcher,
    ctx: &CrawlContext,
    prior_hashes: &HashSet<String>,
) -> CrawlResult {
    let started_at = Utc::now();
    let mut result = CrawlResult::empty(&def.id, started_at);

    match fetcher.fetch_and_parse(def, ctx).await {
        Ok(outcome) => {
            let mut items = dedup_within_run(outcome.items);
            for item in &mut items {
                item.is_new = !prior_hashes.contains(&item.url_hash);
            }
            result.items_total = items.len();
            result.items_new = items.iter().filter(|i| i.is_new).count();
            result.status = classify(result.items_new, result.items_total, &outcome.item_errors);
            if !outcome.item_errors.is_empty() {
                result.error_message = Some(outcome.item_errors.join("; "));
            }
            result.items = items;
        }
        Err(e) => {
            warn!(source_id = %def.id, error = %e, "crawl failed");
            counter!("crawl_failures_total").increment(1);
            result.status = CrawlStatus::Failed;
            result.error_message = Some(e.to_string());
        }
    }

    result.ended_at = Utc::now();
    result.duration_seconds = (result.ended_at - result.started_at)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    info!(
        source_id = %def.id,
        status = result.status.as_str(),
        total = result.items_total,
        new = result.items_new,
        secs = format!("{:.1}", result.duration_seconds),
        "crawl finished"
    );
    counter!("crawl_runs_total").increment(1);
    counter!("crawl_items_new_total").increment(result.items_new as u64);

    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::{FetchStrategy, Schedule};

    pub(crate) fn test_source(id: &str) -> SourceDefinition {
        SourceDefinition {
            id: id.to_string(),
            name: id.to_string(),
            dimension: "technology".to_string(),
            group: None,
            url: "https://example.com/news/".to_string(),
            fetch_strategy: FetchStrategy::Static,
            parser_kind: None,
            schedule: Schedule::Daily,
            enabled: true,
            priority: 2,
            list_selectors: Default::default(),
            detail_selectors: None,
            faculty_selectors: None,
            wait_condition: None,
            detail_via_plain_http: false,
            keyword_filter: None,
            keyword_blacklist: Vec::new(),
            base_url: None,
            tags: vec!["tech".to_string()],
            headers: Default::default(),
            encoding: None,
            request_delay_seconds: None,
            verify_tls: true,
            content_area: None,
            ignore_patterns: Vec::new(),
            max_entries: None,
            rsshub_route: None,
            max_pages: None,
            extra: Default::default(),
        }
    }

    struct FixedFetcher {
        outcome: fn(&SourceDefinition) -> Result<FetchOutcome, CrawlError>,
    }

    #[async_trait]
    impl Fetcher for FixedFetcher {
        async fn fetch_and_parse(
            &self,
            def: &SourceDefinition,
            _ctx: &CrawlContext,
        ) -> Result<FetchOutcome, CrawlError> {
            (self.outcome)(def)
        }
    }

    fn ctx() -> CrawlContext {
        let dir = tempfile::tempdir().unwrap();
        CrawlContext {
            browser: Arc::new(BrowserPool::new(1)),
            snapshots: Arc::new(crate::storage::snapshot_store::SnapshotStore::new(
                dir.into_path(),
            )),
        }
    }

    #[tokio::test]
    async fn run_marks_new_items_against_prior_hashes() {
        let def = test_source("s1");
        let fetcher = FixedFetcher {
            outcome: |def| {
                Ok(FetchOutcome::from_items(vec![
                    CrawledItem::new("a", "https://example.com/a", def),
                    CrawledItem::new("b", "https://example.com/b", def),
                ]))
            },
        };
        let prior: HashSet<String> =
            [urlnorm::url_hash("https://example.com/a")].into_iter().collect();

        let result = run(&def, &fetcher, &ctx(), &prior).await;
        assert_eq!(result.status, CrawlStatus::Success);
        assert_eq!(result.items_total, 2);
        assert_eq!(result.items_new, 1);
        assert!(!result.items[0].is_new);
        assert!(result.items[1].is_new);
        assert!(result.items_new <= result.items_total);
    }

    #[tokio::test]
    async fn run_with_all_duplicates_is_no_new_content() {
        let def = test_source("s1");
        let fetcher = FixedFetcher {
            outcome: |def| {
                Ok(FetchOutcome::from_items(vec![CrawledItem::new(
                    "a",
                    "https://example.com/a",
                    def,
                )]))
            },
        };
        let prior: HashSet<String> =
            [urlnorm::url_hash("https://example.com/a")].into_iter().collect();
        let result = run(&def, &fetcher, &ctx(), &prior).await;
        assert_eq!(result.status, CrawlStatus::NoNewContent);
        assert_eq!(result.items_new, 0);
    }

    #[tokio::test]
    async fn run_captures_errors_as_failed() {
        let def = test_source("s1");
        let fetcher = FixedFetcher {
            outcome: |_| {
                Err(CrawlError::SelectorMiss {
                    url: "https://example.com/news/".into(),
                    selector: "ul.list li".into(),
                })
            },
        };
        let result = run(&def, &fetcher, &ctx(), &HashSet::new()).await;
        assert_eq!(result.status, CrawlStatus::Failed);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .contains("ul.list li"));
        assert!(result.ended_at >= result.started_at);
    }

    #[tokio::test]
    async fn run_with_item_errors_is_partial() {
        let def = test_source("s1");
        let fetcher = FixedFetcher {
            outcome: |def| {
                Ok(FetchOutcome {
                    items: vec![CrawledItem::new("a", "https://example.com/a", def)],
                    item_errors: vec!["detail fetch failed".to_string()],
                })
            },
        };
        let result = run(&def, &fetcher, &ctx(), &HashSet::new()).await;
        assert_eq!(result.status, CrawlStatus::Partial);
    }

    #[tokio::test]
    async fn within_run_url_hash_collisions_collapse() {
        let def = test_source("s1");
        let fetcher = FixedFetcher {
            outcome: |def| {
                Ok(FetchOutcome::from_items(vec![
                    CrawledItem::new("a", "https://example.com/a?utm_source=x", def),
                    CrawledItem::new("a again", "https://example.com/a", def),
                ]))
            },
        };
        let result = run(&def, &fetcher, &ctx(), &HashSet::new()).await;
        assert_eq!(result.items_total, 1);
        let hashes: HashSet<_> = result.items.iter().map(|i| &i.url_hash).collect();
        assert_eq!(hashes.len(), result.items.len());
    }
}
