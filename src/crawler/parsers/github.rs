//! GitHub trending parser: repository search API restricted to a recent
//! creation window, ordered by stars.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::catalog::SourceDefinition;
use crate::crawler::{CrawlContext, CrawledItem, FetchOutcome, Fetcher};
use crate::error::CrawlError;
use crate::fetch::{fetch_json, FetchOptions};
use crate::urlnorm::content_hash;

const GITHUB_SEARCH_URL: &str = "https://api.github.com/search/repositories";
const DEFAULT_TOPIC: &str = "machine-learning";
const DEFAULT_MAX_RESULTS: usize = 20;
const DEFAULT_WINDOW_DAYS: i64 = 7;

pub struct GithubTrendingFetcher;

#[async_trait]
impl Fetcher for GithubTrendingFetcher {
    async fn fetch_and_parse(
        &self,
        def: &SourceDefinition,
        _ctx: &CrawlContext,
    ) -> Result<FetchOutcome, CrawlError> {
        let topic = def.extra_str("topic").unwrap_or(DEFAULT_TOPIC);
        let max_results = def.extra_usize("max_results").unwrap_or(DEFAULT_MAX_RESULTS);
        let window_days = def
            .extra_usize("window_days")
            .map(|d| d as i64)
            .unwrap_or(DEFAULT_WINDOW_DAYS);

        let since = (Utc::now() - Duration::days(window_days)).format("%Y-%m-%d");
        let mut options = FetchOptions::from_source(def);
        // GitHub rejects requests without an Accept header for this API.
        options
            .headers
            .entry("Accept".to_string())
            .or_insert_with(|| "application/vnd.github+json".to_string());
        options.params = vec![
            ("q".to_string(), format!("topic:{topic} created:>{since}")),
            ("sort".to_string(), "stars".to_string()),
            ("order".to_string(), "desc".to_string()),
            ("per_page".to_string(), max_results.to_string()),
        ];

        let body = fetch_json(GITHUB_SEARCH_URL, &options).await?;
        let repos = body["items"].as_array().cloned().unwrap_or_default();

        let mut items = Vec::new();
        for repo in repos.into_iter().take(max_results) {
            let name = repo["full_name"].as_str().unwrap_or("").to_string();
            let url = repo["html_url"].as_str().unwrap_or("").to_string();
            if name.is_empty() || url.is_empty() {
                continue;
            }

            let description = repo["description"].as_str().unwrap_or("").to_string();
            let mut item = CrawledItem::new(name, url, def);
            item.published_at = repo["created_at"]
                .as_str()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|dt| dt.with_timezone(&Utc));
            item.author = repo["owner"]["login"].as_str().map(String::from);
            if !description.is_empty() {
                item.content_hash = Some(content_hash(&description));
                item.summary = Some(description.clone());
                item.content = Some(description);
            }
            if let Some(stars) = repo["stargazers_count"].as_u64() {
                item.extra.insert("stars".to_string(), stars.into());
            }
            if let Some(lang) = repo["language"].as_str() {
                item.extra.insert("language".to_string(), lang.into());
            }
            items.push(item);
        }

        Ok(FetchOutcome::from_items(items))
    }
}
