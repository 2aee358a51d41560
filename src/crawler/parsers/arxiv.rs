//! ArXiv Atom API parser: one query call, entries mapped to items.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::catalog::SourceDefinition;
use crate::crawler::{CrawlContext, CrawledItem, FetchOutcome, Fetcher};
use crate::error::CrawlError;
use crate::fetch::{fetch_page, FetchOptions};
use crate::urlnorm::content_hash;

const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";
const DEFAULT_QUERY: &str = "cat:cs.AI";
const DEFAULT_MAX_RESULTS: usize = 20;
const AUTHOR_DISPLAY_CAP: usize = 5;

#[derive(Debug, Deserialize)]
struct ArxivFeed {
    #[serde(default, rename = "entry")]
    entries: Vec<ArxivEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ArxivEntry {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    published: Option<String>,
    #[serde(default, rename = "author")]
    authors: Vec<ArxivAuthor>,
    #[serde(default, rename = "category")]
    categories: Vec<ArxivCategory>,
}

#[derive(Debug, Default, Deserialize)]
struct ArxivAuthor {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ArxivCategory {
    #[serde(default, rename = "@term")]
    term: Option<String>,
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn author_line(authors: &[ArxivAuthor]) -> Option<String> {
    let names: Vec<&str> = authors
        .iter()
        .filter_map(|a| a.name.as_deref())
        .collect();
    if names.is_empty() {
        return None;
    }
    let mut line = names
        .iter()
        .take(AUTHOR_DISPLAY_CAP)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if names.len() > AUTHOR_DISPLAY_CAP {
        line.push_str(&format!(" et al. ({} authors)", names.len()));
    }
    Some(line)
}

pub struct ArxivFetcher;

#[async_trait]
impl Fetcher for ArxivFetcher {
    async fn fetch_and_parse(
        &self,
        def: &SourceDefinition,
        _ctx: &CrawlContext,
    ) -> Result<FetchOutcome, CrawlError> {
        let search_query = def.extra_str("search_query").unwrap_or(DEFAULT_QUERY);
        let max_results = def.extra_usize("max_results").unwrap_or(DEFAULT_MAX_RESULTS);
        let sort_by = def.extra_str("sort_by").unwrap_or("submittedDate");

        let query_url = format!(
            "{ARXIV_API_URL}?search_query={search_query}&sortBy={sort_by}&sortOrder=descending&max_results={max_results}"
        );

        let options = FetchOptions {
            max_retries: Some(2),
            ..FetchOptions::from_source(def)
        };
        let xml = fetch_page(&query_url, &options).await?;

        let feed: ArxivFeed = from_str(&xml).map_err(|e| CrawlError::Decode {
            url: query_url.clone(),
            message: format!("arxiv atom: {e}"),
        })?;

        let mut items = Vec::new();
        for entry in feed.entries.into_iter().take(max_results) {
            let title = collapse_ws(entry.title.as_deref().unwrap_or(""));
            let link = entry.id.clone().unwrap_or_default();
            if title.is_empty() || link.is_empty() {
                continue;
            }

            let mut item = CrawledItem::new(title, link, def);
            item.published_at = entry
                .published
                .as_deref()
                .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
                .map(|dt| dt.with_timezone(&Utc));
            item.author = author_line(&entry.authors);

            let abstract_text = collapse_ws(entry.summary.as_deref().unwrap_or(""));
            if !abstract_text.is_empty() {
                item.content_hash = Some(content_hash(&abstract_text));
                item.content = Some(abstract_text);
            }

            let categories: Vec<String> = entry
                .categories
                .iter()
                .filter_map(|c| c.term.clone())
                .collect();
            if !categories.is_empty() {
                item.extra.insert(
                    "categories".to_string(),
                    serde_json::to_value(categories).unwrap_or_default(),
                );
            }
            items.push(item);
        }

        Ok(FetchOutcome::from_items(items))
    }
}
