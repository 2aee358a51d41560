//! Hacker News parser: two-step Firebase API, top-story IDs then per-story
//! detail with bounded concurrency.

use async_trait::async_trait;
use chrono::DateTime;
use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::catalog::SourceDefinition;
use crate::crawler::{CrawlContext, CrawledItem, FetchOutcome, Fetcher};
use crate::error::CrawlError;
use crate::fetch::{fetch_json, FetchOptions};
use crate::urlnorm::content_hash;

const HN_TOP_URL: &str = "https://hacker-news.firebaseio.com/v0/topstories.json";
const HN_ITEM_URL: &str = "https://hacker-news.firebaseio.com/v0/item";
const DEFAULT_MAX_RESULTS: usize = 30;
const STORY_FANOUT: usize = 10;

const DEFAULT_AI_KEYWORDS: &[&str] = &[
    "ai",
    "artificial intelligence",
    "machine learning",
    "deep learning",
    "llm",
    "gpt",
    "neural network",
    "transformer",
    "diffusion",
    "人工智能",
    "大模型",
    "机器学习",
];

pub struct HackerNewsFetcher;

#[async_trait]
impl Fetcher for HackerNewsFetcher {
    async fn fetch_and_parse(
        &self,
        def: &SourceDefinition,
        _ctx: &CrawlContext,
    ) -> Result<FetchOutcome, CrawlError> {
        let max_results = def.extra_usize("max_results").unwrap_or(DEFAULT_MAX_RESULTS);
        let options = FetchOptions::from_source(def);

        let ids = fetch_json(HN_TOP_URL, &options).await?;
        let ids: Vec<u64> = serde_json::from_value(ids).map_err(|e| CrawlError::Decode {
            url: HN_TOP_URL.to_string(),
            message: format!("topstories shape: {e}"),
        })?;

        let keywords: Vec<String> = if def.keyword_filter.is_some() {
            def.effective_keywords()
                .iter()
                .map(|k| k.to_lowercase())
                .collect()
        } else {
            DEFAULT_AI_KEYWORDS.iter().map(|k| k.to_string()).collect()
        };

        let stories: Vec<Option<serde_json::Value>> = stream::iter(ids.into_iter().take(max_results))
            .map(|id| {
                let options = options.clone();
                async move {
                    let url = format!("{HN_ITEM_URL}/{id}.json");
                    match fetch_json(&url, &options).await {
                        Ok(v) => Some(v),
                        Err(e) => {
                            warn!(id, error = %e, "HN story fetch failed");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(STORY_FANOUT)
            .collect()
            .await;

        let mut items = Vec::new();
        for story in stories.into_iter().flatten() {
            let title = story["title"].as_str().unwrap_or("").to_string();
            if title.is_empty() {
                continue;
            }
            let title_lower = title.to_lowercase();
            if !keywords.is_empty() && !keywords.iter().any(|k| title_lower.contains(k)) {
                continue;
            }

            let id = story["id"].as_u64().unwrap_or(0);
            let url = story["url"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("https://news.ycombinator.com/item?id={id}"));

            let mut item = CrawledItem::new(title, url, def);
            item.published_at = story["time"]
                .as_i64()
                .and_then(|ts| DateTime::from_timestamp(ts, 0));
            item.author = story["by"].as_str().map(String::from);

            if let Some(text) = story["text"].as_str().filter(|t| !t.is_empty()) {
                item.content_hash = Some(content_hash(text));
                item.content = Some(text.to_string());
            }
            if let Some(score) = story["score"].as_u64() {
                item.extra.insert("score".to_string(), score.into());
            }
            if let Some(comments) = story["descendants"].as_u64() {
                item.extra.insert("comments".to_string(), comments.into());
            }
            items.push(item);
        }

        Ok(FetchOutcome::from_items(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keywords_cover_the_ai_beat() {
        assert!(DEFAULT_AI_KEYWORDS.contains(&"llm"));
        // All lowercase so matching against a lowered title works.
        assert!(DEFAULT_AI_KEYWORDS
            .iter()
            .all(|k| *k == k.to_lowercase().as_str()));
    }
}
