//! RSS strategy: RSS 2.0, Atom, and RDF/RSS 1.0 feeds via quick-xml.
//!
//! The three shapes are tried in order; whichever deserializes wins. Feed
//! HTML content goes through the same sanitizer as detail pages so no
//! script ever reaches `content_html`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use tracing::debug;

use crate::catalog::SourceDefinition;
use crate::config::Settings;
use crate::crawler::{CrawlContext, CrawledItem, FetchOutcome, Fetcher};
use crate::error::CrawlError;
use crate::extract::detail::sanitize_html;
use crate::extract::html_to_text;
use crate::fetch::{fetch_page, FetchOptions};
use crate::urlnorm::content_hash;

pub const DEFAULT_MAX_ENTRIES: usize = 50;

// ---------------------------------------------------------------------------
// Feed shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(default, rename = "item")]
    items: Vec<FeedEntry>,
}

/// RDF (RSS 1.0): items are siblings of the channel element.
#[derive(Debug, Deserialize)]
struct Rdf {
    #[serde(default, rename = "item")]
    items: Vec<FeedEntry>,
}

/// Shared entry shape for RSS 2.0 and RDF.
#[derive(Debug, Default, Deserialize)]
struct FeedEntry {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default, rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(default, rename = "dc:date", alias = "date")]
    dc_date: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "content:encoded", alias = "encoded")]
    content_encoded: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default, rename = "dc:creator", alias = "creator")]
    dc_creator: Option<String>,
    #[serde(default, rename = "category")]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(default, rename = "entry")]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AtomEntry {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "link")]
    links: Vec<AtomLink>,
    #[serde(default)]
    published: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    author: Option<AtomAuthor>,
}

#[derive(Debug, Default, Deserialize)]
struct AtomLink {
    #[serde(default, rename = "@href")]
    href: Option<String>,
    #[serde(default, rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AtomAuthor {
    #[serde(default)]
    name: Option<String>,
}

// ---------------------------------------------------------------------------
// Normalized entry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ParsedEntry {
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub content_html: Option<String>,
    pub categories: Vec<String>,
}

fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

impl FeedEntry {
    fn normalize(self) -> Option<ParsedEntry> {
        let title = self.title.unwrap_or_default().trim().to_string();
        let link = self.link.unwrap_or_default().trim().to_string();
        if title.is_empty() || link.is_empty() {
            return None;
        }
        let published_at = self
            .pub_date
            .as_deref()
            .or(self.dc_date.as_deref())
            .and_then(parse_feed_date);
        Some(ParsedEntry {
            title,
            link,
            published_at,
            author: self.author.or(self.dc_creator),
            summary: self.description.clone(),
            content_html: self.content_encoded.or(self.description),
            categories: self.categories,
        })
    }
}

impl AtomEntry {
    fn normalize(self) -> Option<ParsedEntry> {
        let title = self.title.unwrap_or_default().trim().to_string();
        // Prefer the alternate link; fall back to the first with an href.
        let link = self
            .links
            .iter()
            .find(|l| l.rel.as_deref() == Some("alternate"))
            .or_else(|| self.links.iter().find(|l| l.href.is_some()))
            .and_then(|l| l.href.clone())
            .unwrap_or_default();
        if title.is_empty() || link.is_empty() {
            return None;
        }
        let published_at = self
            .published
            .as_deref()
            .or(self.updated.as_deref())
            .and_then(parse_feed_date);
        Some(ParsedEntry {
            title,
            link,
            published_at,
            author: self.author.and_then(|a| a.name),
            summary: self.summary.clone(),
            content_html: self.content.or(self.summary),
            categories: Vec::new(),
        })
    }
}

/// Name of the document's root element, for dialect sniffing.
fn root_element(xml: &str) -> Option<String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Start(e)) => {
                return Some(String::from_utf8_lossy(e.name().as_ref()).into_owned())
            }
            Ok(quick_xml::events::Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Parse any of the three supported feed dialects, selected by root element.
/// An empty-but-valid feed is not an error; a non-feed document is.
pub fn parse_feed(xml: &str) -> Result<Vec<ParsedEntry>, CrawlError> {
    let decode_err = |message: String| CrawlError::Decode {
        url: String::new(),
        message,
    };

    match root_element(xml).as_deref() {
        Some("rss") => {
            let rss = from_str::<Rss>(xml).map_err(|e| decode_err(format!("rss: {e}")))?;
            Ok(rss
                .channel
                .items
                .into_iter()
                .filter_map(FeedEntry::normalize)
                .collect())
        }
        Some("feed") => {
            let atom = from_str::<AtomFeed>(xml).map_err(|e| decode_err(format!("atom: {e}")))?;
            Ok(atom
                .entries
                .into_iter()
                .filter_map(AtomEntry::normalize)
                .collect())
        }
        Some(root) if root == "rdf:RDF" || root == "RDF" => {
            let rdf = from_str::<Rdf>(xml).map_err(|e| decode_err(format!("rdf: {e}")))?;
            Ok(rdf.items.into_iter().filter_map(FeedEntry::normalize).collect())
        }
        Some(root) => Err(decode_err(format!(
            "document root <{root}> is not RSS, Atom, or RDF"
        ))),
        None => Err(decode_err("empty or unparseable document".to_string())),
    }
}

pub struct RssFetcher;

impl RssFetcher {
    fn resolve_feed_url(def: &SourceDefinition) -> String {
        match &def.rsshub_route {
            Some(route) => {
                let base = Settings::global().rsshub_base_url.trim_end_matches('/');
                format!("{base}{route}")
            }
            None => def.url.clone(),
        }
    }
}

#[async_trait]
impl Fetcher for RssFetcher {
    async fn fetch_and_parse(
        &self,
        def: &SourceDefinition,
        _ctx: &CrawlContext,
    ) -> Result<FetchOutcome, CrawlError> {
        let feed_url = Self::resolve_feed_url(def);
        let options = FetchOptions::from_source(def);
        let xml = fetch_page(&feed_url, &options).await?;

        let entries = parse_feed(&xml).map_err(|e| match e {
            CrawlError::Decode { message, .. } => CrawlError::Decode {
                url: feed_url.clone(),
                message,
            },
            other => other,
        })?;

        let max_entries = def.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES);
        let keywords: Vec<String> = def
            .effective_keywords()
            .iter()
            .map(|k| k.to_lowercase())
            .collect();

        let mut items = Vec::new();
        for entry in entries.into_iter().take(max_entries) {
            if !keywords.is_empty() {
                let haystack = format!(
                    "{} {}",
                    entry.title,
                    entry.summary.as_deref().unwrap_or("")
                )
                .to_lowercase();
                if !keywords.iter().any(|k| haystack.contains(k)) {
                    continue;
                }
            }

            let mut item = CrawledItem::new(entry.title, entry.link, def);
            item.published_at = entry.published_at;
            item.author = entry.author;
            item.summary = entry.summary.map(|s| html_to_text(&s));

            if let Some(raw_html) = entry.content_html {
                let clean_html = sanitize_html(&raw_html, &item.url);
                let plain = html_to_text(&clean_html);
                if !plain.is_empty() {
                    item.content_hash = Some(content_hash(&plain));
                    item.content = Some(plain);
                    item.content_html = Some(clean_html);
                }
            }
            if !entry.categories.is_empty() {
                item.extra.insert(
                    "categories".to_string(),
                    serde_json::to_value(&entry.categories).unwrap_or_default(),
                );
            }
            items.push(item);
        }

        debug!(source_id = %def.id, entries = items.len(), "feed parsed");
        Ok(FetchOutcome::from_items(items))
    }
}
