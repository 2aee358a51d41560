//! Twitter parsers backed by the twitterapi.io gateway: keyword search and
//! KOL timelines. Both need `TWITTER_API_KEY`; without it the source fails
//! with a configuration error rather than producing an empty artifact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::catalog::SourceDefinition;
use crate::config::Settings;
use crate::crawler::{CrawlContext, CrawledItem, FetchOutcome, Fetcher};
use crate::error::CrawlError;
use crate::fetch::{fetch_json, FetchOptions};
use crate::urlnorm::content_hash;

const SEARCH_URL: &str = "https://api.twitterapi.io/twitter/tweet/advanced_search";
const TIMELINE_URL: &str = "https://api.twitterapi.io/twitter/user/last_tweets";
const DEFAULT_MAX_RESULTS: usize = 20;

fn api_options(def: &SourceDefinition) -> Result<FetchOptions, CrawlError> {
    let key = &Settings::global().twitter_api_key;
    if key.is_empty() {
        return Err(CrawlError::Configuration(
            "TWITTER_API_KEY is not set".to_string(),
        ));
    }
    let mut options = FetchOptions::from_source(def);
    options.headers.insert("X-API-Key".to_string(), key.clone());
    Ok(options)
}

fn tweet_to_item(tweet: &Value, def: &SourceDefinition) -> Option<CrawledItem> {
    let text = tweet["text"].as_str()?.trim().to_string();
    if text.is_empty() {
        return None;
    }
    let author = tweet["author"]["userName"]
        .as_str()
        .or_else(|| tweet["author"]["username"].as_str())
        .unwrap_or("unknown");
    let url = tweet["url"].as_str().map(String::from).or_else(|| {
        tweet["id"]
            .as_str()
            .map(|id| format!("https://x.com/{author}/status/{id}"))
    })?;

    // Tweets have no headline; the truncated text stands in for one.
    let title: String = text.chars().take(120).collect();
    let mut item = CrawledItem::new(title, url, def);
    item.published_at = tweet["createdAt"]
        .as_str()
        .and_then(|t| {
            DateTime::parse_from_rfc3339(t)
                .or_else(|_| DateTime::parse_from_str(t, "%a %b %d %H:%M:%S %z %Y"))
                .ok()
        })
        .map(|dt| dt.with_timezone(&Utc));
    item.author = Some(author.to_string());
    item.content_hash = Some(content_hash(&text));
    item.content = Some(text);
    for (field, key) in [
        ("likes", "likeCount"),
        ("retweets", "retweetCount"),
        ("replies", "replyCount"),
    ] {
        if let Some(n) = tweet[key].as_u64() {
            item.extra.insert(field.to_string(), n.into());
        }
    }
    Some(item)
}

fn collect_tweets(body: &Value, def: &SourceDefinition, cap: usize) -> Vec<CrawledItem> {
    let tweets = body["tweets"]
        .as_array()
        .or_else(|| body["data"].as_array())
        .cloned()
        .unwrap_or_default();
    tweets
        .iter()
        .take(cap)
        .filter_map(|t| tweet_to_item(t, def))
        .collect()
}

/// Keyword search across recent tweets.
pub struct TwitterSearchFetcher;

#[async_trait]
impl Fetcher for TwitterSearchFetcher {
    async fn fetch_and_parse(
        &self,
        def: &SourceDefinition,
        _ctx: &CrawlContext,
    ) -> Result<FetchOutcome, CrawlError> {
        let mut options = api_options(def)?;
        let query = def
            .extra_str("query")
            .map(String::from)
            .unwrap_or_else(|| def.effective_keywords().join(" OR "));
        if query.is_empty() {
            return Err(CrawlError::Configuration(format!(
                "twitter_search source {} has neither query nor keyword_filter",
                def.id
            )));
        }
        options.params = vec![
            ("query".to_string(), query),
            ("queryType".to_string(), "Latest".to_string()),
        ];

        let body = fetch_json(SEARCH_URL, &options).await?;
        let cap = def.extra_usize("max_results").unwrap_or(DEFAULT_MAX_RESULTS);
        Ok(FetchOutcome::from_items(collect_tweets(&body, def, cap)))
    }
}

/// Timeline of a tracked key-opinion-leader account.
pub struct TwitterKolFetcher;

#[async_trait]
impl Fetcher for TwitterKolFetcher {
    async fn fetch_and_parse(
        &self,
        def: &SourceDefinition,
        _ctx: &CrawlContext,
    ) -> Result<FetchOutcome, CrawlError> {
        let mut options = api_options(def)?;
        let user = def.extra_str("username").ok_or_else(|| {
            CrawlError::Configuration(format!("twitter_kol source {} needs username", def.id))
        })?;
        options.params = vec![("userName".to_string(), user.to_string())];

        let body = fetch_json(TIMELINE_URL, &options).await?;
        let cap = def.extra_usize("max_results").unwrap_or(DEFAULT_MAX_RESULTS);
        let mut items = collect_tweets(&body, def, cap);
        for item in &mut items {
            item.extra.insert("kol".to_string(), user.into());
        }
        Ok(FetchOutcome::from_items(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::tests::test_source;

    #[test]
    fn tweet_mapping_builds_url_from_id() {
        let def = test_source("tw");
        let tweet = serde_json::json!({
            "id": "12345",
            "text": "大模型推理成本下降",
            "author": {"userName": "airesearcher"},
            "createdAt": "2026-02-01T10:00:00Z",
            "likeCount": 42
        });
        let item = tweet_to_item(&tweet, &def).unwrap();
        assert_eq!(item.url, "https://x.com/airesearcher/status/12345");
        assert_eq!(item.author.as_deref(), Some("airesearcher"));
        assert!(item.published_at.is_some());
        assert_eq!(item.extra["likes"], serde_json::json!(42));
        assert!(item.content_hash.is_some());
    }

    #[test]
    fn empty_text_is_skipped() {
        let def = test_source("tw");
        let tweet = serde_json::json!({"id": "1", "text": "  "});
        assert!(tweet_to_item(&tweet, &def).is_none());
    }
}
