//! Declarative source catalog.
//!
//! One YAML file per dimension under `sources/`, each with a top-level
//! `dimension` key and a `sources:` list. `twitter.yaml` mixes dimensions via
//! a per-item `dimension` field. A file-level `default_keyword_filter` is
//! inherited by sources that do not set their own.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How a source's list page is fetched and parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    #[default]
    Static,
    Dynamic,
    Rss,
    Snapshot,
    Faculty,
}

/// Symbolic crawl frequency, resolved by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    #[serde(rename = "2h")]
    TwoHourly,
    #[serde(rename = "4h")]
    FourHourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

/// Selector bundle for list-page extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSelectors {
    #[serde(default = "default_list_item")]
    pub list_item: String,
    /// `_self` means: the list_item element itself carries the title text.
    #[serde(default = "default_anchor")]
    pub title: String,
    /// `_self` means: the list_item element itself carries the link.
    #[serde(default = "default_anchor")]
    pub link: String,
    #[serde(default = "default_href")]
    pub link_attr: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub date_format: String,
    #[serde(default)]
    pub date_regex: String,
}

fn default_list_item() -> String {
    "li".to_string()
}
fn default_anchor() -> String {
    "a".to_string()
}
fn default_href() -> String {
    "href".to_string()
}

/// Selector bundle for detail-page extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailSelectors {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: String,
    /// field name → heading text; section text is collected until the next
    /// heading element.
    #[serde(default)]
    pub heading_sections: HashMap<String, String>,
    /// field name → label prefix; matches `Label: value` / `Label：value`
    /// lines in paragraphs and list items.
    #[serde(default)]
    pub label_prefix_sections: HashMap<String, String>,
}

/// Selector bundle for the faculty roster strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FacultySelectors {
    #[serde(default)]
    pub card: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub photo: String,
    #[serde(default)]
    pub research_areas: String,
    /// Page URL template with `{page}` placeholder, e.g. `list_{page}.html`.
    #[serde(default)]
    pub next_page: String,
}

/// One declared source. Immutable once loaded; reloaded at scheduler start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub dimension: String,
    #[serde(default)]
    pub group: Option<String>,
    pub url: String,
    #[serde(default)]
    pub fetch_strategy: FetchStrategy,
    /// Bespoke API parser name; takes precedence over `fetch_strategy`.
    #[serde(default)]
    pub parser_kind: Option<String>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub list_selectors: ListSelectors,
    #[serde(default)]
    pub detail_selectors: Option<DetailSelectors>,
    #[serde(default)]
    pub faculty_selectors: Option<FacultySelectors>,
    /// Symbolic state (`load`, `networkidle`) or a CSS selector the rendered
    /// page must match.
    #[serde(default)]
    pub wait_condition: Option<String>,
    /// Fetch detail pages over plain HTTP even for the dynamic strategy.
    #[serde(default)]
    pub detail_via_plain_http: bool,
    /// Title whitelist. Empty list → no filter; absent → dimension default.
    #[serde(default)]
    pub keyword_filter: Option<Vec<String>>,
    #[serde(default)]
    pub keyword_blacklist: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub request_delay_seconds: Option<f64>,
    /// TLS-laxity switch for legacy servers (weak cipher suites, bad chains).
    #[serde(default = "default_true")]
    pub verify_tls: bool,

    // Strategy-specific extras.
    /// Snapshot: selector for the meaningful content area.
    #[serde(default)]
    pub content_area: Option<String>,
    /// Snapshot: regexes stripped from text before hashing.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// RSS: cap on entries per crawl.
    #[serde(default)]
    pub max_entries: Option<usize>,
    /// RSS: RSSHub route resolved against the configured base URL.
    #[serde(default)]
    pub rsshub_route: Option<String>,
    /// Faculty: pagination bound.
    #[serde(default)]
    pub max_pages: Option<usize>,
    /// Parser-specific extras (`search_query`, `max_results`, …) kept
    /// untyped; bespoke parsers read what they need.
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

fn default_true() -> bool {
    true
}
fn default_priority() -> i32 {
    2
}

impl SourceDefinition {
    /// Base URL for relative-link resolution: explicit `base_url` or the
    /// list URL itself.
    pub fn effective_base_url(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| self.url.clone())
    }

    pub fn effective_keywords(&self) -> &[String] {
        self.keyword_filter.as_deref().unwrap_or(&[])
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }

    pub fn extra_usize(&self, key: &str) -> Option<usize> {
        self.extra.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
    }
}

/// The closed set of dimensions known to the analytical pipeline.
pub const DIMENSIONS: &[&str] = &[
    "national_policy",
    "beijing_policy",
    "technology",
    "talent",
    "industry",
    "universities",
    "events",
    "personnel",
    "sentiment",
    "twitter",
    "university_faculty",
];

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    dimension: Option<String>,
    #[serde(default)]
    default_keyword_filter: Vec<String>,
    #[serde(default)]
    sources: Vec<SourceDefinition>,
}

/// Load every `*.yaml` under `sources_dir` into a flat source list.
///
/// Duplicated ids are a configuration error. Unknown dimensions are kept but
/// warned about so a typo shows up in the logs instead of an empty feed.
pub fn load_catalog(sources_dir: &Path) -> Result<Vec<SourceDefinition>> {
    let mut all: Vec<SourceDefinition> = Vec::new();
    if !sources_dir.exists() {
        warn!(dir = %sources_dir.display(), "sources directory not found");
        return Ok(all);
    }

    let mut files: Vec<_> = fs::read_dir(sources_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "yaml" || x == "yml").unwrap_or(false))
        .collect();
    files.sort();

    for path in files {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file: CatalogFile = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;

        let file_dimension = file.dimension.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        for mut source in file.sources {
            if source.dimension.is_empty() {
                source.dimension = file_dimension.clone();
            }
            if source.keyword_filter.is_none() && !file.default_keyword_filter.is_empty() {
                source.keyword_filter = Some(file.default_keyword_filter.clone());
            }
            if !DIMENSIONS.contains(&source.dimension.as_str()) {
                warn!(
                    source_id = %source.id,
                    dimension = %source.dimension,
                    "source declares a dimension outside the known set"
                );
            }
            all.push(source);
        }
    }

    // Ids must be globally unique; duplicate keys would corrupt artifacts.
    let mut seen = std::collections::HashSet::new();
    for s in &all {
        if !seen.insert(s.id.clone()) {
            anyhow::bail!("duplicate source id in catalog: {}", s.id);
        }
    }

    info!(count = all.len(), dir = %sources_dir.display(), "loaded source catalog");
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_source_with_defaults() {
        let yaml = r#"
dimension: national_policy
default_keyword_filter: ["人工智能"]
sources:
  - id: most_policy
    name: 科技部
    url: https://www.most.gov.cn/zxgz/
    fetch_strategy: static
    schedule: daily
    list_selectors:
      list_item: "ul.list li"
"#;
        let file: CatalogFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.sources.len(), 1);
        let s = &file.sources[0];
        assert_eq!(s.fetch_strategy, FetchStrategy::Static);
        assert_eq!(s.schedule, Schedule::Daily);
        assert!(s.enabled);
        assert_eq!(s.list_selectors.title, "a");
        assert_eq!(s.list_selectors.link_attr, "href");
        // File-level keyword default is applied at load time, not parse time.
        assert!(s.keyword_filter.is_none());
    }

    #[test]
    fn parser_kind_and_schedule_aliases() {
        let yaml = r#"
sources:
  - id: hn_top
    name: Hacker News
    url: https://hacker-news.firebaseio.com/v0/
    parser_kind: hacker_news_api
    schedule: 4h
"#;
        let file: CatalogFile = serde_yaml::from_str(yaml).unwrap();
        let s = &file.sources[0];
        assert_eq!(s.parser_kind.as_deref(), Some("hacker_news_api"));
        assert_eq!(s.schedule, Schedule::FourHourly);
    }

    #[test]
    fn load_catalog_applies_dimension_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("technology.yaml"),
            r#"
dimension: technology
default_keyword_filter: ["AI"]
sources:
  - id: a_feed
    name: A
    url: https://a.example/feed
    fetch_strategy: rss
  - id: b_list
    name: B
    url: https://b.example/news
    keyword_filter: []
"#,
        )
        .unwrap();

        let sources = load_catalog(dir.path()).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].dimension, "technology");
        assert_eq!(
            sources[0].keyword_filter.as_deref(),
            Some(["AI".to_string()].as_slice())
        );
        // Explicit empty list suppresses the inherited default.
        assert_eq!(sources[1].effective_keywords().len(), 0);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("x.yaml"),
            "dimension: events\nsources:\n  - {id: dup, name: A, url: 'https://a/'}\n  - {id: dup, name: B, url: 'https://b/'}\n",
        )
        .unwrap();
        assert!(load_catalog(dir.path()).is_err());
    }
}
